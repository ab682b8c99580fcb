//! Launching processes that outlive the client.

use std::process::Command;

/// Configure a command so the spawned process is not tied to the lifetime
/// of the invoking terminal or process group.
pub trait DetachExt {
    fn detached(&mut self) -> &mut Self;
}

#[cfg(unix)]
impl DetachExt for Command {
    fn detached(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;

        // SAFETY: setsid(2) is async-signal-safe and the closure touches no
        // state shared with the parent.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setsid()?;
                Ok(())
            });
        }
        self
    }
}

#[cfg(windows)]
impl DetachExt for Command {
    fn detached(&mut self) -> &mut Self {
        use std::os::windows::process::CommandExt;

        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

        self.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP)
    }
}
