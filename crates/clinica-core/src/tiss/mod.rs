//! TISS guide and lot state machines.
//!
//! ```text
//! Guide:  Rascunho ──► Validado ──(lot sent)──► Enviado ──► Aceito ──► Pago
//!            ▲            │                        │                    ▲
//!            └──(reopen)──┘                        └────► Glosado ──────┘
//!
//! Lot:    Aberto ──► Fechado ──► Enviado ──► Processando ──► Aceito ──► Pago
//!            ▲          │            │             │
//!            └─(reopen)─┘            └─────────────┴──► Rejeitado
//! ```
//!
//! Transitions are the only mutators of `status`. A failed guard leaves the
//! entity untouched and returns [`InvalidStateTransition`].

mod guide;
mod lote;
mod validation;

pub use guide::*;
pub use lote::*;
pub use validation::*;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Default cap on guides per lot.
pub const DEFAULT_MAX_GUIAS_POR_LOTE: usize = 100;

/// Which kind of billing entity a transition targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Guide,
    Lote,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Guide => f.write_str("guide"),
            EntityKind::Lote => f.write_str("lote"),
        }
    }
}

/// A transition attempted from a state that does not allow it, or whose guard failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("cannot apply '{event}' to {entity} {id} in state '{from}': {reason}")]
pub struct InvalidStateTransition {
    pub entity: EntityKind,
    pub id: String,
    pub from: String,
    pub event: String,
    pub reason: String,
}

impl InvalidStateTransition {
    pub(crate) fn guide(
        id: &str,
        from: impl fmt::Display,
        event: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            entity: EntityKind::Guide,
            id: id.to_string(),
            from: from.to_string(),
            event: event.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn lote(
        id: &str,
        from: impl fmt::Display,
        event: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            entity: EntityKind::Lote,
            id: id.to_string(),
            from: from.to_string(),
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

pub type TransitionResult<T> = Result<T, InvalidStateTransition>;
