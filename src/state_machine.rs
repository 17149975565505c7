//! Request lifecycle: `SUBMITTED | PENDING --plan--> PLANNED`.
//!
//! Planning writes two collections in a fixed order. The intervention is
//! persisted first and the request second, so a failure in between leaves an
//! orphan intervention (found and repaired by reconciliation) and never a
//! request marked planned without one.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info, warn};

use crate::storage::models::{EntityKind, Intervention, Request, RequestState};
use crate::storage::{Repository, StoreError};

pub struct RequestLifecycle {
    requests: Arc<dyn Repository<Request>>,
    interventions: Arc<dyn Repository<Intervention>>,
    /// Serializes planning so a request cannot pass the state check twice.
    plan_lock: Mutex<()>,
}

impl RequestLifecycle {
    pub fn new(
        requests: Arc<dyn Repository<Request>>,
        interventions: Arc<dyn Repository<Intervention>>,
    ) -> Self {
        Self {
            requests,
            interventions,
            plan_lock: Mutex::new(()),
        }
    }

    /// Plan a request: create its intervention, then mark it planned.
    pub fn plan(&self, request_id: u64) -> Result<Intervention, StoreError> {
        let _guard = self.plan_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut request = self
            .requests
            .find_by_id(request_id)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Request, request_id))?;

        if !request.state.is_plannable() || request.intervention_id.is_some() {
            return Err(StoreError::invalid_state(format!(
                "request {request_id} is already planned"
            )));
        }

        let intervention = self
            .interventions
            .save(Intervention::for_request(request_id))?;
        let intervention_id = intervention
            .id
            .ok_or_else(|| StoreError::validation("saved intervention has no id"))?;

        request.state = RequestState::Planned;
        request.intervention_id = Some(intervention_id);
        if let Err(e) = self.requests.update(request) {
            error!(
                request_id,
                intervention_id,
                error = %e,
                "intervention created but request update failed"
            );
            return Err(StoreError::PartialFailure {
                request_id,
                intervention_id,
                source: Box::new(e),
            });
        }

        info!(request_id, intervention_id, "request planned");
        Ok(intervention)
    }

    /// Link an orphan intervention to its request when that request is still
    /// waiting to be planned.
    pub fn adopt_orphan(&self, intervention_id: u64) -> Result<Request, StoreError> {
        let _guard = self.plan_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let intervention = self
            .interventions
            .find_by_id(intervention_id)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Intervention, intervention_id))?;
        let request_id = intervention.request_id;

        let mut request = self
            .requests
            .find_by_id(request_id)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Request, request_id))?;

        if request.intervention_id == Some(intervention_id) {
            return Ok(request);
        }
        if !request.state.is_plannable() || request.intervention_id.is_some() {
            return Err(StoreError::invalid_state(format!(
                "request {request_id} is already linked to intervention {:?}",
                request.intervention_id
            )));
        }

        request.state = RequestState::Planned;
        request.intervention_id = Some(intervention_id);
        let request = self.requests.update(request)?;
        warn!(request_id, intervention_id, "adopted orphan intervention");
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_state;

    /// Request repository whose updates always fail.
    struct FailingUpdates(Arc<dyn Repository<Request>>);

    impl Repository<Request> for FailingUpdates {
        fn find_all(&self) -> Result<Vec<Request>, StoreError> {
            self.0.find_all()
        }

        fn find_by_id(&self, id: u64) -> Result<Option<Request>, StoreError> {
            self.0.find_by_id(id)
        }

        fn save(&self, entity: Request) -> Result<Request, StoreError> {
            self.0.save(entity)
        }

        fn update(&self, _entity: Request) -> Result<Request, StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }

        fn reserve_id(&self) -> Result<u64, StoreError> {
            self.0.reserve_id()
        }
    }

    #[test]
    fn failed_request_update_is_a_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let request = state.requests.save(Request::new("Broken streetlight")).unwrap();
        let request_id = request.id.unwrap();

        let lifecycle = RequestLifecycle::new(
            Arc::new(FailingUpdates(Arc::clone(&state.requests))),
            Arc::clone(&state.interventions),
        );

        let err = lifecycle.plan(request_id).unwrap_err();
        let StoreError::PartialFailure {
            request_id: failed_request,
            intervention_id,
            ..
        } = err
        else {
            panic!("expected partial failure, got {err:?}");
        };
        assert_eq!(failed_request, request_id);

        // The request is untouched; the intervention is an orphan.
        let stored = state.requests.find_by_id(request_id).unwrap().unwrap();
        assert_eq!(stored.state, RequestState::Submitted);
        assert_eq!(stored.intervention_id, None);
        let orphan = state
            .interventions
            .find_by_id(intervention_id)
            .unwrap()
            .unwrap();
        assert_eq!(orphan.request_id, request_id);

        // Reconciliation links it back up.
        let adopted = state.lifecycle.adopt_orphan(intervention_id).unwrap();
        assert_eq!(adopted.state, RequestState::Planned);
        assert_eq!(adopted.intervention_id, Some(intervention_id));
        assert!(matches!(
            state.lifecycle.plan(request_id),
            Err(StoreError::InvalidState(_))
        ));
    }
}
