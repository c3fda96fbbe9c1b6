//! Cross-source reconciliation of text-derived statement records against
//! authoritative OFX exports, and content-hash identifier assignment for
//! whatever stays unmatched.
//!
//! The two sources disagree on shape: the text side may call something a
//! check number that the OFX side encodes as a counterparty name (SEPA
//! transfers being the notorious case), records can be reordered, and the
//! same bank day may hold several transactions with the same amount. The
//! cache therefore indexes every entry under several key variants and the
//! matcher falls back to a ranked fuzzy comparison with explicit
//! ambiguity rejection.

pub mod cache;
pub mod ident;
pub mod matcher;
pub mod ofx;

pub use cache::{CacheError, ReconcileCache, TxData, TxKey};
pub use matcher::{Reconciler, ReconcileError, SEPA_PLACEHOLDER};
pub use ofx::{OfxStatement, OfxTransaction};
