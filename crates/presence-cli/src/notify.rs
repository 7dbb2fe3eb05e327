//! Success cue — the audible/visible nudge fired when an attendance
//! mark commits. Injectable so headless runs get a no-op.

use std::io::Write;

/// Non-blocking notification that a mark succeeded. Implementations
/// must never fail the frame loop.
pub trait SuccessCue: Send {
    fn success(&mut self);
}

/// Silent cue for headless or test runs.
pub struct NoopCue;

impl SuccessCue for NoopCue {
    fn success(&mut self) {}
}

/// Rings the terminal bell. Write errors are ignored; this is a
/// best-effort cue, not a delivery guarantee.
pub struct TerminalBell;

impl SuccessCue for TerminalBell {
    fn success(&mut self) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }
}
