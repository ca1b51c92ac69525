use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "GRID_OPERATOR_PROFILE", default = "dev")]
    pub profile: String,

    /// Restrict the controller to one namespace. Unset watches all.
    #[envconfig(from = "GRID_OPERATOR_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Resync period for converged clusters.
    #[envconfig(from = "GRID_OPERATOR_REQUEUE_SECS", default = "60")]
    pub requeue_secs: u64,

    /// Recheck period while a cluster is still rolling out.
    #[envconfig(from = "GRID_OPERATOR_PROGRESS_REQUEUE_SECS", default = "10")]
    pub progress_requeue_secs: u64,

    #[envconfig(from = "GRID_OPERATOR_ERROR_BACKOFF_SECS", default = "10")]
    pub error_backoff_secs: u64,

    /// Upper bound for every API server call.
    #[envconfig(from = "GRID_OPERATOR_API_TIMEOUT_SECS", default = "10")]
    pub api_timeout_secs: u64,

    /// Capacity of the membership trigger channel.
    #[envconfig(from = "GRID_OPERATOR_TRIGGER_CAPACITY", default = "16")]
    pub trigger_capacity: usize,

    /// Reach members through a local port-forward instead of service DNS
    /// (profile default: true in dev, false in prod).
    /// Env: GRID_OPERATOR_LOCAL_RUN
    #[envconfig(from = "GRID_OPERATOR_LOCAL_RUN")]
    pub local_run: Option<bool>,

    #[envconfig(from = "GRID_OPERATOR_MEMBER_POLL_SECS", default = "5")]
    pub member_poll_secs: u64,

    /// Field manager and event reporter name.
    #[envconfig(from = "GRID_OPERATOR_FIELD_MANAGER", default = "grid-operator")]
    pub field_manager: String,
}

impl OperatorConfig {
    /// Fill unset optionals from the profile, keeping explicit env values.
    ///
    /// - dev: local_run=true
    /// - prod: local_run=false
    pub fn apply_profile_defaults(mut self) -> Self {
        let def_local_run = match self.profile.as_str() {
            "prod" | "production" => false,
            _ /* dev */ => true,
        };
        if self.local_run.is_none() {
            self.local_run = Some(def_local_run);
        }
        if self.trigger_capacity == 0 {
            // a zero-capacity channel would turn every trigger into a rendezvous
            self.trigger_capacity = 1;
        }
        self
    }
}
