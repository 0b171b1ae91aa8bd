use serde::{Deserialize, Serialize};

/// How discovery picks among admissible runtimes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadBalancingStrategy {
    /// Least-loaded first.
    #[default]
    EvenWorkload,
    /// Most-loaded admissible runtime first, to pack work.
    WorkloadFocusing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Runtimes above this workload are never returned by discovery.
    #[serde(default = "default_workload_threshold")]
    pub workload_threshold: u8,
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,
    /// Cache hint attached to runtime rows created from deploy uploads.
    #[serde(default = "default_expire_in_seconds")]
    pub default_expire_in_seconds: u64,
    /// Registry owner account id.
    #[serde(default)]
    pub owner_account: Option<String>,
    /// Additional accounts allowed to run administrative operations.
    #[serde(default)]
    pub admin_accounts: Vec<String>,
}

fn default_workload_threshold() -> u8 {
    85
}
fn default_expire_in_seconds() -> u64 {
    900
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            workload_threshold: default_workload_threshold(),
            strategy: LoadBalancingStrategy::default(),
            default_expire_in_seconds: default_expire_in_seconds(),
            owner_account: None,
            admin_accounts: Vec::new(),
        }
    }
}

impl RegistrySettings {
    pub fn with_owner(mut self, account_id: impl Into<String>) -> Self {
        self.owner_account = Some(account_id.into());
        self
    }

    pub fn with_admin(mut self, account_id: impl Into<String>) -> Self {
        self.admin_accounts.push(account_id.into());
        self
    }

    pub fn is_admin(&self, account_id: &str) -> bool {
        self.owner_account.as_deref() == Some(account_id)
            || self.admin_accounts.iter().any(|a| a == account_id)
    }
}
