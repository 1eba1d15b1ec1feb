//! Guide state machine and draft editing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{GuideStatus, Procedimento, TissGuide};

use super::{InvalidStateTransition, TransitionResult, ValidationReport};

/// Events accepted by a guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GuideEvent {
    /// Apply a validation pass; blocked by any `erro` entry.
    Validate { report: ValidationReport },
    /// Back to draft for editing.
    Reopen,
    /// Containing lot was closed.
    Lock,
    /// Containing lot was reopened before submission.
    Unlock,
    /// Containing lot was sent to the operator.
    Submit,
    /// Containing lot was rejected as a whole.
    Release,
    Accept,
    Glosa {
        valor_glosado: Decimal,
        motivo: Option<String>,
    },
    /// Defaults to the billed value minus any glosa.
    Pay { valor_pago: Option<Decimal> },
}

impl GuideEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GuideEvent::Validate { .. } => "validate",
            GuideEvent::Reopen => "reopen",
            GuideEvent::Lock => "lock",
            GuideEvent::Unlock => "unlock",
            GuideEvent::Submit => "submit",
            GuideEvent::Release => "release",
            GuideEvent::Accept => "accept",
            GuideEvent::Glosa { .. } => "glosa",
            GuideEvent::Pay { .. } => "pay",
        }
    }
}

impl TissGuide {
    /// Apply an event. On error the guide is unchanged.
    pub fn transition(&mut self, event: GuideEvent) -> TransitionResult<GuideStatus> {
        let name = event.name();
        let from = self.status;
        let result = self.apply(event);
        match &result {
            Ok(to) => {
                self.touch();
                debug!(guide_id = %self.id, from = %from, to = %to, event = name, "guide transition");
            }
            Err(err) => {
                warn!(guide_id = %self.id, from = %from, event = name, reason = %err.reason, "guide transition rejected");
            }
        }
        result
    }

    fn apply(&mut self, event: GuideEvent) -> TransitionResult<GuideStatus> {
        use GuideStatus::*;

        let name = event.name();

        match (self.status, event) {
            (Pago, _) => self.reject(name, "guia paga é final"),

            (Rascunho, GuideEvent::Validate { report }) => {
                if !report.is_clean() {
                    return self.reject(
                        name,
                        format!("validação com {} erro(s)", report.error_count()),
                    );
                }
                self.status = Validado;
                Ok(Validado)
            }

            (Validado, GuideEvent::Reopen) => {
                if self.locked || self.lote_id.is_some() {
                    return self.reject(name, "guia pertence a um lote");
                }
                self.status = Rascunho;
                Ok(Rascunho)
            }

            (Validado, GuideEvent::Lock) => {
                if self.lote_id.is_none() {
                    return self.reject(name, "guia fora de lote");
                }
                self.locked = true;
                Ok(Validado)
            }

            (Validado, GuideEvent::Unlock) => {
                if !self.locked {
                    return self.reject(name, "guia não está travada");
                }
                self.locked = false;
                Ok(Validado)
            }

            (Validado, GuideEvent::Submit) => {
                if !self.locked || self.lote_id.is_none() {
                    return self.reject(name, "guia só é enviada dentro de um lote fechado");
                }
                self.locked = false;
                self.status = Enviado;
                Ok(Enviado)
            }

            // A whole-lot rejection voids verdicts already recorded for the guide.
            (Enviado | Aceito | Glosado, GuideEvent::Release) => {
                self.valor_glosado = Decimal::ZERO;
                self.motivo_glosa = None;
                self.lote_id = None;
                self.locked = false;
                self.status = Validado;
                Ok(Validado)
            }

            (Enviado, GuideEvent::Accept) => {
                self.valor_glosado = Decimal::ZERO;
                self.motivo_glosa = None;
                self.status = Aceito;
                Ok(Aceito)
            }

            (Enviado, GuideEvent::Glosa { valor_glosado, motivo }) => {
                if valor_glosado <= Decimal::ZERO || valor_glosado > self.valor_total {
                    return self.reject(name, "valor glosado fora do intervalo da guia");
                }
                self.valor_glosado = valor_glosado;
                self.motivo_glosa = motivo;
                self.status = Glosado;
                Ok(Glosado)
            }

            (Aceito | Glosado, GuideEvent::Pay { valor_pago }) => {
                let expected = self.valor_total - self.valor_glosado;
                let valor_pago = valor_pago.unwrap_or(expected);
                if valor_pago < Decimal::ZERO || valor_pago > self.valor_total {
                    return self.reject(name, "valor pago fora do intervalo da guia");
                }
                self.valor_pago = valor_pago;
                self.status = Pago;
                Ok(Pago)
            }

            _ => self.reject(name, "transição não permitida"),
        }
    }

    fn reject(&self, event: &str, reason: impl Into<String>) -> TransitionResult<GuideStatus> {
        Err(InvalidStateTransition::guide(&self.id, self.status, event, reason))
    }

    /// Drafts are the only editable guides.
    pub fn ensure_editable(&self) -> TransitionResult<()> {
        if self.status == GuideStatus::Rascunho {
            Ok(())
        } else {
            Err(InvalidStateTransition::guide(
                &self.id,
                self.status,
                "edit",
                "apenas rascunhos podem ser editados",
            ))
        }
    }

    /// Deletion is allowed for drafts and validated guides not locked in a closed lot.
    pub fn ensure_deletable(&self) -> TransitionResult<()> {
        let deletable = matches!(self.status, GuideStatus::Rascunho | GuideStatus::Validado);
        if deletable && !self.locked {
            Ok(())
        } else {
            Err(InvalidStateTransition::guide(
                &self.id,
                self.status,
                "delete",
                if self.locked {
                    "guia travada em lote fechado"
                } else {
                    "guia já enviada"
                },
            ))
        }
    }

    /// Edit a draft; totals are recomputed afterwards.
    pub fn edit<F>(&mut self, f: F) -> TransitionResult<()>
    where
        F: FnOnce(&mut TissGuide),
    {
        self.ensure_editable()?;
        f(self);
        self.recalculate();
        self.touch();
        Ok(())
    }

    pub fn add_procedimento(&mut self, procedimento: Procedimento) -> TransitionResult<()> {
        self.edit(|g| g.procedimentos.push(procedimento))
    }

    pub fn remove_procedimento(&mut self, index: usize) -> TransitionResult<Procedimento> {
        self.ensure_editable()?;
        if index >= self.procedimentos.len() {
            return Err(InvalidStateTransition::guide(
                &self.id,
                self.status,
                "edit",
                format!("procedimento {} inexistente", index),
            ));
        }
        let removed = self.procedimentos.remove(index);
        self.recalculate();
        self.touch();
        Ok(removed)
    }
}
