//! AWS provider for stackup
//!
//! Implements [`stackup_cloud::CloudProvider`] on EC2 (key pair, security
//! group, instance) and Elastic Load Balancing v2 (application load
//! balancer, target groups, HTTP listener with path rules). Everything is
//! placed in the region's default VPC.
//!
//! ```ignore
//! let provider = AwsProvider::new("us-east-1", "./keys").await;
//! let status = provider.check_auth().await?;
//! ```

pub mod context;
pub mod error;
pub mod provider;

pub use context::AwsContext;
pub use error::{classify_code, from_sdk};
pub use provider::AwsProvider;
