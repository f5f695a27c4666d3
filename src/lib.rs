//! Library to back up a MySQL/MariaDB database together with a directory tree.
//!
//! A run dumps the database, archives the file tree and combines both into a
//! single `tar.gz` archive. The archive is kept in a local backup directory or
//! delivered to an FTP or SFTP server, and old backups are rotated away.
//!
//! The entry point is [`agent::BackupAgent`], configured with
//! [`config::Settings`].

#![forbid(unsafe_code)]

pub mod agent;
pub mod artifact;
pub mod cli;
pub mod config;
pub mod hooks;
pub mod logging;
pub mod producers;
pub mod transport;
pub mod util;
