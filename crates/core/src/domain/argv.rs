// Argument List Builder

use super::action::Action;
use super::options::{OptionValue, Options};

/// Build the openssl argv for an action and its options.
///
/// Order is the action tokens, then one group per option key in insertion
/// order. Empty value lists emit nothing.
pub fn build_args(action: &Action, options: &Options) -> Vec<String> {
    let mut args = action.tokens();

    for (key, value) in options.iter() {
        match value {
            OptionValue::Bare => args.push(key.to_string()),
            OptionValue::Flag => args.push(format!("-{}", key)),
            OptionValue::Value(v) => {
                args.push(format!("-{}", key));
                args.push(v.clone());
            }
            OptionValue::Values(values) => {
                for v in values {
                    args.push(format!("-{}", key));
                    args.push(v.clone());
                }
            }
        }
    }

    args
}
