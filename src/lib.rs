//! Fluent HTTP request builder with retry/backoff for transport failures.
//!
//! ```no_run
//! use reqkit::{Dispatcher, RequestSpec};
//!
//! # async fn run() -> Result<(), reqkit::SendError> {
//! let response = RequestSpec::new()
//!     .set_base_url("https://api.example.com")
//!     .endpoint("/users")
//!     .with_token("secret")
//!     .data([("name", "Ada")])
//!     .as_json()
//!     .retry(2, 100_000)
//!     .post(&Dispatcher::new())
//!     .await?;
//!
//! if !response.is_success() {
//!     eprintln!("server said {}", response.status());
//! }
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod error;
pub mod response;
pub mod retry;
pub mod spec;
pub mod transport;
pub mod wire;

pub use dispatch::Dispatcher;
pub use error::{AttemptError, SendError, TransportError};
pub use response::Response;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use spec::{Attachment, BodyFormat, Method, RequestSpec};
pub use transport::{ReqwestTransport, Transport};
pub use wire::{MultipartPart, WireBody, WireRequest};
