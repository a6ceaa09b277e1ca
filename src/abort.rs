/// Raised by a background collaborator when the whole run must stop.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    pub step: usize,
    pub reason: String,
}

impl std::fmt::Display for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} aborted the run: {}", self.step, self.reason)
    }
}
