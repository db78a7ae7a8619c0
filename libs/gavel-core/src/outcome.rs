use crate::verdict::Verdict;

/// A settled judgement: a verdict, an optional human-readable message, and
/// whatever partial data the failing stage had already produced (a compile
/// bundle missing its last program, the streams of a timed-out run).
#[derive(Debug, Clone)]
pub struct Settled<T> {
    pub verdict: Verdict,
    pub msg: Option<String>,
    pub data: Option<T>,
}

impl<T> Settled<T> {
    pub fn of(verdict: Verdict) -> Self {
        Settled { verdict, msg: None, data: None }
    }

    pub fn with_msg(verdict: Verdict, msg: impl Into<String>) -> Self {
        Settled { verdict, msg: Some(msg.into()), data: None }
    }

    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    /// Carry the verdict and message into a different data domain,
    /// dropping the payload. Used when a stage's failure propagates up
    /// through a caller that works with another data type.
    pub fn recast<U>(self) -> Settled<U> {
        Settled { verdict: self.verdict, msg: self.msg, data: None }
    }
}

/// Result of one judging stage. `Open` means the stage finished cleanly and
/// the pipeline continues with its data; `Settled` means a verdict has been
/// reached and nothing downstream runs. Stages return this instead of
/// throwing: a wrong answer is data, not an error.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Open(T),
    Settled(Settled<T>),
}

impl<T> Outcome<T> {
    pub fn settled(verdict: Verdict, msg: impl Into<String>) -> Self {
        Outcome::Settled(Settled::with_msg(verdict, msg))
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Outcome::Settled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recast_keeps_verdict_and_message() {
        let settled: Settled<u32> =
            Settled::with_msg(Verdict::CompileError, "missing semicolon").with_data(7);
        let recast: Settled<String> = settled.recast();
        assert_eq!(recast.verdict, Verdict::CompileError);
        assert_eq!(recast.msg.as_deref(), Some("missing semicolon"));
        assert!(recast.data.is_none());
    }

    #[test]
    fn settled_constructor_sets_message() {
        let outcome: Outcome<()> = Outcome::settled(Verdict::Rejected, "Aborted by user");
        match outcome {
            Outcome::Settled(s) => {
                assert_eq!(s.verdict, Verdict::Rejected);
                assert_eq!(s.msg.as_deref(), Some("Aborted by user"));
            }
            Outcome::Open(_) => panic!("expected settled outcome"),
        }
    }
}
