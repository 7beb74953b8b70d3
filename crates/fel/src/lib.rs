//! `entrada-fel` — FEL certification domain model.
//!
//! Plain-data entities with explicit state-transition functions. Nothing in
//! this crate touches the network or storage; persistence goes through the
//! repository ports in [`repository`], and the certifier through the client
//! crate.

pub mod assembler;
pub mod audit;
pub mod document;
pub mod error_record;
pub mod invoice;
pub mod operation;
pub mod repository;
pub mod token;

pub use assembler::{AssemblyError, assemble};
pub use audit::{AuditEntry, AuditResult};
pub use document::{DocumentStatus, FelDocument, RETRY_CEILING};
pub use error_record::{FelError, FelSeverity};
pub use invoice::{BuyerInfo, DocumentType, Invoice, InvoiceLine, InvoiceStatus};
pub use operation::FelOperation;
pub use repository::{
    CertificationStore, FelDocumentRepository, FelErrorRepository, FelTokenRepository,
    InvoiceRepository, RepositoryError,
};
pub use token::{FelToken, TokenStatus};
