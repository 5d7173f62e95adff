// ABOUTME: Library root for sshrun - exposes the SSH execution core.
// ABOUTME: The thin CLI is in main.rs.

pub mod error;
pub mod ssh;
