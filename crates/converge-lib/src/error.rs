//! Error types for deployment signaling, waiting and reconciliation

use thiserror::Error;

/// Errors returned by cluster resource operations
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The requested resource does not exist
    #[error("resource not found")]
    NotFound,

    /// Any other Kubernetes API failure
    #[error("kubernetes error: {0}")]
    Kube(kube::Error),

    /// A client could not be constructed
    #[error("failed to build cluster client: {0}")]
    Client(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound)
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => ClusterError::NotFound,
            other => ClusterError::Kube(other),
        }
    }
}

/// Main error type for convergence operations
#[derive(Debug, Error)]
pub enum DeployError {
    /// The deploy reference could not be pushed
    #[error("failed to mark {commit} for deployment in deploy group {deploy_group}: {message}")]
    SignalFailure {
        commit: String,
        deploy_group: String,
        message: String,
    },

    /// The deploy group has no instances to wait for
    #[error("couldn't find any instances for service {service} in deploy group {deploy_group}")]
    NoInstancesFound {
        service: String,
        deploy_group: String,
    },

    /// The deploy group did not converge before the deadline
    #[error("timed out after {elapsed_secs} seconds waiting for {deploy_group} in {service} to be deployed")]
    DeploymentTimeout {
        service: String,
        deploy_group: String,
        elapsed_secs: u64,
    },

    /// Reading a live resource failed for a reason other than "not found"
    #[error("failed to read {kind} {name}: {source}")]
    ReconciliationFetch {
        kind: &'static str,
        name: String,
        #[source]
        source: ClusterError,
    },

    /// A create, patch or delete call failed
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The status API could not be queried
    #[error("status api error: {0}")]
    StatusApi(String),

    /// A background delete-and-recreate task panicked or was cancelled
    #[error("background bounce task failed: {0}")]
    BounceTask(String),
}

impl DeployError {
    pub fn fetch(kind: &'static str, name: impl Into<String>, source: ClusterError) -> Self {
        Self::ReconciliationFetch {
            kind,
            name: name.into(),
            source,
        }
    }

    /// Process exit code for failures surfaced at a command boundary
    pub fn exit_code(&self) -> u8 {
        1
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
