//! The default `DataCollaborator` wired into the HTTP binary.
//!
//! §1 explicitly puts data retrieval out of THE CORE's scope ("thin external
//! collaborators"): the request body (§6) carries an experiment definition and
//! an opaque `query_parameters` bag, not goal rows. A real deployment of this
//! service supplies its own collaborator (a database- or warehouse-backed
//! implementation of `experiment::DataCollaborator`) and wires it into
//! `AppState` in place of this one. Absent that, `/evaluate` fails cleanly
//! with an `UpstreamError` rather than silently fabricating data.

use crate::error::AppError;
use crate::experiment::DataCollaborator;
use crate::model::Experiment;
use crate::table::AggregatedGoalRow;

pub struct NullDataCollaborator;

impl DataCollaborator for NullDataCollaborator {
    fn get_agg_goals(&self, _experiment: &Experiment) -> Result<Vec<AggregatedGoalRow>, AppError> {
        Err(AppError::upstream(
            "no data collaborator configured: this binary only wires the example NullDataCollaborator; \
             embed this crate with a real DataCollaborator implementation to serve /evaluate",
        ))
    }
}
