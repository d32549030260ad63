//! Cheapest-first selection of tokens to offset a CO2 target.
//!
//! Tokens are bought whole, so a token is only selected while its CO2 fits in
//! what is still uncovered. The cheapest token that would overshoot is offered
//! separately as a `top_up`, priced pro rata, and is not counted as covered.

use crate::domain::{round6, DomainError};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub token_id: Uuid,
    pub code: String,
    pub co2_equivalent: f64,
    pub quantity: f64,
    pub price_cents: i64,
    pub value_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedOffer {
    pub token_id: Uuid,
    pub code: String,
    pub co2_equivalent: f64,
    pub quantity: f64,
    pub cost_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopUp {
    pub token_id: Uuid,
    pub code: String,
    pub co2_needed: f64,
    pub co2_equivalent: f64,
    pub prorated_cost_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationPlan {
    pub target_co2: f64,
    pub covered_co2: f64,
    pub uncovered_co2: f64,
    pub complete: bool,
    pub total_cost_cents: i64,
    pub avg_cost_per_tonne_cents: i64,
    pub selected: Vec<SelectedOffer>,
    pub top_up: Option<TopUp>,
}

const EPSILON: f64 = 1e-9;

pub fn plan_compensation(target_co2: f64, mut offers: Vec<Offer>) -> Result<CompensationPlan, DomainError> {
    if !(target_co2 > 0.0) || !target_co2.is_finite() {
        return Err(DomainError::Invalid("target CO2 must be a positive number of tonnes".into()));
    }
    offers.retain(|o| o.co2_equivalent > 0.0);
    // cheapest per token first; ties broken by more CO2 for the money
    offers.sort_by(|a, b| {
        a.value_cents
            .cmp(&b.value_cents)
            .then(b.co2_equivalent.total_cmp(&a.co2_equivalent))
    });

    let mut remaining = target_co2;
    let mut selected = Vec::new();
    let mut top_up = None;
    let mut total_cost = 0i64;

    for offer in offers {
        if remaining <= EPSILON {
            break;
        }
        if offer.co2_equivalent <= remaining + EPSILON {
            remaining -= offer.co2_equivalent;
            total_cost += offer.value_cents;
            selected.push(SelectedOffer {
                token_id: offer.token_id,
                code: offer.code,
                co2_equivalent: offer.co2_equivalent,
                quantity: offer.quantity,
                cost_cents: offer.value_cents,
            });
        } else if top_up.is_none() {
            let fraction = remaining / offer.co2_equivalent;
            top_up = Some(TopUp {
                token_id: offer.token_id,
                code: offer.code,
                co2_needed: round6(remaining),
                co2_equivalent: offer.co2_equivalent,
                prorated_cost_cents: (fraction * offer.value_cents as f64).round() as i64,
            });
        }
    }

    let uncovered = round6(remaining.max(0.0));
    let covered = round6(target_co2 - uncovered);
    if uncovered <= EPSILON {
        top_up = None;
    }
    Ok(CompensationPlan {
        target_co2,
        covered_co2: covered,
        uncovered_co2: uncovered,
        complete: uncovered <= EPSILON,
        total_cost_cents: total_cost,
        avg_cost_per_tonne_cents: if covered > 0.0 {
            (total_cost as f64 / covered).round() as i64
        } else {
            0
        },
        selected,
        top_up,
    })
}
