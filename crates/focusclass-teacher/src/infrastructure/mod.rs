//! Infrastructure layer for the teacher application.
//!
//! Contains OS-facing adapters: TCP/HTTP sockets and file-system storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `focusclass_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod network;
pub mod storage;
