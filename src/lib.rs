//! # rxrcli - IOS-XR XML-CLI Configuration Client
//!
//! `rxrcli` drives the XML-CLI management shell of Cisco IOS-XR routers over an
//! interactive SSH terminal. It logs in, switches the terminal into `xml`
//! mode, exchanges enveloped requests strictly one at a time, and layers a
//! lock / candidate / commit workflow on top of those exchanges.
//!
//! ## Features
//!
//! - **Pattern-Framed Sessions**: Every wait is an ordered set of prompt patterns with a timeout
//! - **Typed Device Errors**: Structured XML errors, plain CLI error lines and invalid input are told apart
//! - **Configuration Workflow**: Lock, stage, diff, commit (optionally confirmed or replacing), discard and rollback
//! - **Pluggable Transport**: SSH by default, any [`session::Connector`] for tests or other stream sources
//! - **Recording & Replay**: JSONL session recordings that can be normalized into fixtures
//! - **Async/Await**: Built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rxrcli::config::DeviceConfig;
//! use rxrcli::session::{CommitOptions, XrSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceConfig::new("192.168.1.1", "admin", "password");
//!     let mut session = XrSession::new(config);
//!
//!     // Logs in, enters XML mode and takes the configuration lock.
//!     session.open().await?;
//!
//!     session
//!         .load_candidate_config(None, Some("hostname edge1"))
//!         .await?;
//!     println!("{}", session.compare_config().await?);
//!     session
//!         .commit_config(&CommitOptions::new().with_comment("rename"))
//!         .await?;
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::XrSession`] - One device session and its configuration state machine
//! - [`prompt`] - Prompt sets used to frame the terminal stream
//! - [`classify`] - Request envelopes and reply classification
//! - [`error::XrError`] - Error types for sessions and the workflow
//! - [`config`] - Device configuration and SSH algorithm lists

pub mod classify;
pub mod config;
pub mod error;
pub mod prompt;
pub mod session;

pub use config::DeviceConfig;
pub use error::XrError;
pub use session::XrSession;
