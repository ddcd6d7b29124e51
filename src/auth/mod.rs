//! Token issuance, the credential-provider seam, and the HTTP endpoint that
//! hands credentials to clients.

pub mod client;
pub mod server;
pub mod token;

pub use client::{CredentialProvider, HttpTokenClient, LocalIssuer};
pub use token::{Claims, Credential, TokenIssuer};
