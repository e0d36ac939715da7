use rand::seq::index;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::filter::DateWindow;
use crate::models::{InterventionRecord, OperatorSample, SampleOutcome};

/// Draws `min(k, n)` of the given records uniformly without replacement.
/// Drawn records keep their source order and every original field.
pub fn draw<R: Rng + ?Sized>(
    records: &[&InterventionRecord],
    k: usize,
    rng: &mut R,
) -> Result<SampleOutcome, AnalysisError> {
    if k == 0 {
        return Err(AnalysisError::InvalidSampleSize);
    }
    if records.is_empty() {
        return Ok(SampleOutcome::NoData);
    }

    let mut picked = index::sample(rng, records.len(), k.min(records.len())).into_vec();
    picked.sort_unstable();

    Ok(SampleOutcome::Drawn {
        available: records.len(),
        records: picked.into_iter().map(|position| records[position].clone()).collect(),
    })
}

/// One spot-check sample per operator, each drawn from that operator's
/// records inside `window`.
pub fn sample_operators<R: Rng + ?Sized>(
    records: &[&InterventionRecord],
    operators: &[String],
    window: &DateWindow,
    k: usize,
    rng: &mut R,
) -> Result<Vec<OperatorSample>, AnalysisError> {
    let mut samples = Vec::with_capacity(operators.len());

    for operator in operators {
        let candidates: Vec<&InterventionRecord> = records
            .iter()
            .copied()
            .filter(|record| &record.operator == operator && window.includes(record))
            .collect();

        let outcome = draw(&candidates, k, rng)?;
        match &outcome {
            SampleOutcome::NoData => warn!(%operator, "no data for this operator in the window"),
            SampleOutcome::Drawn { available, records } => {
                debug!(%operator, available, drawn = records.len(), "sample drawn")
            }
        }

        samples.push(OperatorSample {
            operator: operator.clone(),
            outcome,
        });
    }

    Ok(samples)
}
