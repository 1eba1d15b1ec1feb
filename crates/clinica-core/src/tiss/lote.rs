//! Lot state machine, membership, and per-guide adjudication.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{GuideStatus, LoteStatus, TissGuide, TissLote};

use super::{GuideEvent, InvalidStateTransition, TransitionResult};

/// Events accepted by a lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoteEvent {
    /// Freeze the selection; member guides are locked.
    Close,
    /// Undo a close after the transport refused the artifact.
    Reopen,
    /// Transport acknowledged the submission.
    Send { protocolo: String },
    StartProcessing,
    Accept,
    /// Operator rejected the whole lot; guides are released for re-lotting.
    Reject { motivo: String },
    Pay,
}

impl LoteEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LoteEvent::Close => "close",
            LoteEvent::Reopen => "reopen",
            LoteEvent::Send { .. } => "send",
            LoteEvent::StartProcessing => "start_processing",
            LoteEvent::Accept => "accept",
            LoteEvent::Reject { .. } => "reject",
            LoteEvent::Pay => "pay",
        }
    }
}

/// Operator verdict for one guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resultado", rename_all = "snake_case")]
pub enum Adjudicacao {
    Aceita,
    Glosada {
        valor_glosado: Decimal,
        motivo: Option<String>,
    },
}

/// Verdict addressed to a guide of the lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideAdjudication {
    pub guia_id: String,
    pub adjudicacao: Adjudicacao,
}

/// Result of applying one verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjudicationOutcome {
    pub guia_id: String,
    pub result: TransitionResult<GuideStatus>,
}

impl TissLote {
    fn invalid(&self, event: &str, reason: impl Into<String>) -> InvalidStateTransition {
        InvalidStateTransition::lote(&self.id, self.status, event, reason)
    }

    /// Add a validated guide while the lot is open. The lot total moves with it.
    pub fn add_guide(&mut self, guide: &mut TissGuide, limit: usize) -> TransitionResult<()> {
        if self.status != LoteStatus::Aberto {
            return Err(self.invalid("add_guide", "lote não está aberto"));
        }
        if guide.status != GuideStatus::Validado || guide.locked {
            return Err(self.invalid(
                "add_guide",
                format!("guia {} não está validada", guide.id),
            ));
        }
        if let Some(other) = &guide.lote_id {
            return Err(self.invalid(
                "add_guide",
                format!("guia {} já pertence ao lote {}", guide.id, other),
            ));
        }
        if guide.operadora_id != self.operadora_id {
            return Err(self.invalid(
                "add_guide",
                format!("guia {} é de outra operadora", guide.id),
            ));
        }
        if self.guia_ids.len() >= limit {
            return Err(self.invalid("add_guide", format!("lote atingiu o limite de {} guias", limit)));
        }

        self.guia_ids.insert(guide.id.clone());
        self.valor_total += guide.valor_total;
        guide.lote_id = Some(self.id.clone());
        guide.touch();
        self.touch();
        Ok(())
    }

    /// Remove a guide while the lot is open.
    pub fn remove_guide(&mut self, guide: &mut TissGuide) -> TransitionResult<()> {
        if self.status != LoteStatus::Aberto {
            return Err(self.invalid("remove_guide", "lote não está aberto"));
        }
        if guide.lote_id.as_deref() != Some(self.id.as_str()) || !self.guia_ids.contains(&guide.id) {
            return Err(self.invalid(
                "remove_guide",
                format!("guia {} não pertence ao lote", guide.id),
            ));
        }

        self.guia_ids.remove(&guide.id);
        self.valor_total -= guide.valor_total;
        guide.lote_id = None;
        guide.touch();
        self.touch();
        Ok(())
    }

    /// Sum of the given guides' totals.
    pub fn members_total(guides: &[TissGuide]) -> Decimal {
        guides.iter().map(|g| g.valor_total).sum()
    }

    /// Only open lots may be deleted.
    pub fn ensure_deletable(&self) -> TransitionResult<()> {
        if self.status == LoteStatus::Aberto {
            Ok(())
        } else {
            Err(self.invalid("delete", "apenas lotes abertos podem ser excluídos"))
        }
    }

    /// Delete an open lot, detaching its guides.
    pub fn dissolve(&mut self, guides: &mut [TissGuide]) -> TransitionResult<()> {
        self.ensure_deletable()?;
        self.check_members("delete", guides)?;
        for guide in guides.iter_mut() {
            guide.lote_id = None;
            guide.touch();
        }
        self.guia_ids.clear();
        self.valor_total = Decimal::ZERO;
        self.touch();
        Ok(())
    }

    fn check_members(&self, event: &str, guides: &[TissGuide]) -> TransitionResult<()> {
        let matches = guides.len() == self.guia_ids.len()
            && guides.iter().all(|g| {
                self.guia_ids.contains(&g.id) && g.lote_id.as_deref() == Some(self.id.as_str())
            });
        if matches {
            Ok(())
        } else {
            Err(self.invalid(event, "guias informadas não correspondem ao lote"))
        }
    }

    /// Apply a lot event, cascading to member guides.
    ///
    /// `guides` must be exactly the lot's members. Guide changes are staged
    /// and written back only if every guide accepts its cascaded event.
    pub fn transition(
        &mut self,
        event: LoteEvent,
        guides: &mut [TissGuide],
    ) -> TransitionResult<LoteStatus> {
        let name = event.name();
        let from = self.status;
        let result = self.apply(event, guides);
        match &result {
            Ok(to) => {
                self.touch();
                info!(lote_id = %self.id, numero = self.numero_lote, from = %from, to = %to, event = name, guides = guides.len(), "lote transition");
            }
            Err(err) => {
                warn!(lote_id = %self.id, from = %from, event = name, reason = %err.reason, "lote transition rejected");
            }
        }
        result
    }

    fn apply(&mut self, event: LoteEvent, guides: &mut [TissGuide]) -> TransitionResult<LoteStatus> {
        use LoteStatus::*;

        let name = event.name();
        self.check_members(name, guides)?;

        let (next, cascade) = match (self.status, &event) {
            (Aberto, LoteEvent::Close) => {
                if self.guia_ids.is_empty() {
                    return Err(self.invalid(name, "nenhuma guia selecionada"));
                }
                (Fechado, Some(GuideEvent::Lock))
            }
            (Fechado, LoteEvent::Reopen) => (Aberto, Some(GuideEvent::Unlock)),
            (Fechado, LoteEvent::Send { protocolo }) => {
                if protocolo.trim().is_empty() {
                    return Err(self.invalid(name, "protocolo de envio vazio"));
                }
                (Enviado, Some(GuideEvent::Submit))
            }
            (Enviado, LoteEvent::StartProcessing) => (Processando, None),
            (Enviado | Processando, LoteEvent::Accept) => (Aceito, None),
            (Enviado | Processando, LoteEvent::Reject { .. }) => (Rejeitado, Some(GuideEvent::Release)),
            (Aceito, LoteEvent::Pay) => {
                let pending = guides
                    .iter()
                    .filter(|g| g.status == GuideStatus::Enviado)
                    .count();
                if pending > 0 {
                    return Err(self.invalid(name, format!("{} guia(s) sem retorno da operadora", pending)));
                }
                (Pago, None)
            }
            _ => return Err(self.invalid(name, "transição não permitida")),
        };

        let mut staged: Vec<TissGuide> = guides.to_vec();
        if let Some(guide_event) = cascade {
            for guide in staged.iter_mut() {
                guide.transition(guide_event.clone()).map_err(|e| {
                    self.invalid(name, format!("guia {}: {}", e.id, e.reason))
                })?;
            }
        }
        if next == Pago {
            for guide in staged.iter_mut().filter(|g| g.status != GuideStatus::Pago) {
                guide
                    .transition(GuideEvent::Pay { valor_pago: None })
                    .map_err(|e| self.invalid(name, format!("guia {}: {}", e.id, e.reason)))?;
            }
        }

        guides.clone_from_slice(&staged);
        match event {
            LoteEvent::Send { protocolo } => self.protocolo = Some(protocolo),
            LoteEvent::Reject { motivo } => {
                self.motivo_rejeicao = Some(motivo);
                self.guia_ids.clear();
                self.valor_total = Decimal::ZERO;
            }
            LoteEvent::Reopen => self.artifact_hash = None,
            _ => {}
        }
        self.status = next;
        Ok(next)
    }

    /// Apply operator verdicts guide by guide.
    ///
    /// Each verdict succeeds or fails on its own; one bad entry does not
    /// block the rest.
    pub fn adjudicate(
        &self,
        guides: &mut [TissGuide],
        verdicts: &[GuideAdjudication],
    ) -> Vec<AdjudicationOutcome> {
        let open_for_verdicts = matches!(
            self.status,
            LoteStatus::Enviado | LoteStatus::Processando | LoteStatus::Aceito
        );

        verdicts
            .iter()
            .map(|verdict| {
                let result = if !open_for_verdicts {
                    Err(self.invalid("adjudicate", "lote não aguarda retorno"))
                } else if !self.guia_ids.contains(&verdict.guia_id) {
                    Err(self.invalid(
                        "adjudicate",
                        format!("guia {} não pertence ao lote", verdict.guia_id),
                    ))
                } else {
                    match guides.iter_mut().find(|g| g.id == verdict.guia_id) {
                        None => Err(self.invalid(
                            "adjudicate",
                            format!("guia {} não carregada", verdict.guia_id),
                        )),
                        Some(guide) => guide.transition(match &verdict.adjudicacao {
                            Adjudicacao::Aceita => GuideEvent::Accept,
                            Adjudicacao::Glosada {
                                valor_glosado,
                                motivo,
                            } => GuideEvent::Glosa {
                                valor_glosado: *valor_glosado,
                                motivo: motivo.clone(),
                            },
                        }),
                    }
                };
                AdjudicationOutcome {
                    guia_id: verdict.guia_id.clone(),
                    result,
                }
            })
            .collect()
    }
}
