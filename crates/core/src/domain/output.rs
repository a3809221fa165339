// Process Output Accumulation

/// Ordered chunk accumulator with a running total length
#[derive(Debug, Clone, Default)]
pub struct ChunkBuffer {
    chunks: Vec<Vec<u8>>,
    len: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: impl Into<Vec<u8>>) {
        let chunk = chunk.into();
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    /// Total bytes received so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Concatenate in arrival order into a buffer of exactly `len()` bytes
    pub fn concat(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Everything a finished process produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Diagnostic stream decoded as UTF-8 (invalid sequences replaced)
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
