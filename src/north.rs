//! Destination contract.
//!
//! Every North connector type implements [`NorthDestination`]. The
//! orchestrator holds no destination-specific logic: it calls these hooks and
//! feeds the outcome of `handle_content` into its retry state machine.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use north_engine::{Content, DeliveryError, NorthDestination};
//!
//! struct Console;
//!
//! #[async_trait]
//! impl NorthDestination for Console {
//!     async fn handle_content(&self, content: &Content) -> Result<(), DeliveryError> {
//!         match content {
//!             Content::TimeValues(values) => println!("{} values", values.len()),
//!             Content::Raw { file_path } => println!("file {}", file_path.display()),
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::model::Content;

#[async_trait]
pub trait NorthDestination: Send + Sync {
    /// Open the session with the destination. Called on every start.
    async fn connect(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Close the session. Called last during stop.
    async fn disconnect(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Deliver one unit. Must not return before the destination has
    /// acknowledged (or refused) it.
    async fn handle_content(&self, content: &Content) -> Result<(), DeliveryError>;

    /// Check that the destination is reachable with the current settings.
    async fn test_connection(&self) -> Result<(), DeliveryError> {
        self.connect().await?;
        self.disconnect().await
    }
}
