//! Validation of resource specs before they are reconciled.
//!
//! A resource is only reconciled when every registered [`FlinkResourceValidator`] approves it.
//! Validation errors are human readable messages that end up in the resource status.
pub mod default_validator;

use stackable_flink_crd::{
    flink_config::FlinkConfig, session_job::FlinkSessionJob, FlinkDeployment,
};

pub use default_validator::DefaultValidator;

pub trait FlinkResourceValidator: Send + Sync {
    /// Returns the first violated rule, `None` if the deployment is valid.
    fn validate_deployment(&self, deployment: &FlinkDeployment) -> Option<String>;

    /// Validates a session job against the session cluster it is submitted to, which is `None`
    /// if it does not exist.
    fn validate_session_job(
        &self,
        session_job: &FlinkSessionJob,
        session: Option<&FlinkDeployment>,
    ) -> Option<String>;
}

/// All validators of the operator, assembled once at startup
pub struct Validators {
    validators: Vec<Box<dyn FlinkResourceValidator>>,
}

impl Validators {
    pub fn new(validators: Vec<Box<dyn FlinkResourceValidator>>) -> Self {
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn validate_deployment(&self, deployment: &FlinkDeployment) -> Option<String> {
        self.validators
            .iter()
            .find_map(|validator| validator.validate_deployment(deployment))
    }

    pub fn validate_session_job(
        &self,
        session_job: &FlinkSessionJob,
        session: Option<&FlinkDeployment>,
    ) -> Option<String> {
        self.validators
            .iter()
            .find_map(|validator| validator.validate_session_job(session_job, session))
    }
}

/// Registers the validators shipped with the operator.
pub fn discover_validators(default_config: &FlinkConfig) -> Validators {
    let validators = Validators::new(vec![Box::new(DefaultValidator::new(
        default_config.clone(),
    ))]);
    tracing::info!(validators = validators.len(), "Registered resource validators");
    validators
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectEverything;

    impl FlinkResourceValidator for RejectEverything {
        fn validate_deployment(&self, _deployment: &FlinkDeployment) -> Option<String> {
            Some("Rejected by policy".to_string())
        }

        fn validate_session_job(
            &self,
            _session_job: &FlinkSessionJob,
            _session: Option<&FlinkDeployment>,
        ) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_all_validators_must_approve() {
        let deployment = FlinkDeployment::new("basic-example", Default::default());
        let session_job = FlinkSessionJob::new("basic-session-job", Default::default());

        let validators = Validators::new(vec![Box::new(RejectEverything)]);
        assert_eq!(
            Some("Rejected by policy".to_string()),
            validators.validate_deployment(&deployment)
        );
        assert_eq!(None, validators.validate_session_job(&session_job, Some(&deployment)));

        assert_eq!(None, Validators::new(vec![]).validate_deployment(&deployment));
    }

    #[test]
    fn test_discovered_validators_reject_missing_version() {
        let deployment = FlinkDeployment::new("basic-example", Default::default());
        let validators = discover_validators(&FlinkConfig::new());

        assert_eq!(1, validators.len());
        assert_eq!(
            Some("Flink Version must be defined.".to_string()),
            validators.validate_deployment(&deployment)
        );
    }
}
