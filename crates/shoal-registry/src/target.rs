use shoal_core::{Filter, ResourceType, RuntimeStatus, ServiceIdentity, Table};

/// What discovery selects a runtime for.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeTarget {
    /// Runtime rows of a registered service.
    Service { service_id: String },
    /// Runtime rows matched by identity tuple. Control-plane services have no
    /// `service` row to resolve first.
    ServiceIdentity(ServiceIdentity),
    /// A host resource.
    Host {
        account: String,
        name: String,
        resource_type: ResourceType,
    },
}

impl RuntimeTarget {
    pub fn table(&self) -> Table {
        match self {
            RuntimeTarget::Service { .. } | RuntimeTarget::ServiceIdentity(_) => {
                Table::ServiceRuntime
            }
            RuntimeTarget::Host { .. } => Table::Resource,
        }
    }

    /// Filter identifying the target, before admission constraints.
    pub fn filter(&self) -> Filter {
        match self {
            RuntimeTarget::Service { service_id } => {
                Filter::new().eq("service_id", service_id.as_str())
            }
            RuntimeTarget::ServiceIdentity(identity) => {
                let filter = Filter::new()
                    .eq("application", identity.application.as_str())
                    .eq("module", identity.module.as_str())
                    .eq("name", identity.name.as_str());
                match identity.pinned_version() {
                    Some(version) => filter.eq("version", version),
                    None => filter,
                }
            }
            RuntimeTarget::Host {
                account,
                name,
                resource_type,
            } => Filter::new()
                .eq("name", name.as_str())
                .eq("type", resource_type.as_str())
                .eq("account", account.as_str()),
        }
    }

    /// Target filter restricted to admissible rows.
    pub fn admission_filter(&self, threshold: u8) -> Filter {
        self.filter()
            .eq("status", RuntimeStatus::Ready.as_str())
            .at_most("workload_percentage", f64::from(threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_core::store::Condition;

    #[test]
    fn service_target_reads_runtime_table() {
        let target = RuntimeTarget::Service {
            service_id: "svc-1".into(),
        };
        assert_eq!(target.table(), Table::ServiceRuntime);
        let filter = target.admission_filter(85);
        assert_eq!(filter.conditions().len(), 3);
        assert!(
            filter
                .conditions()
                .contains(&("workload_percentage".into(), Condition::Le(85.0)))
        );
    }

    #[test]
    fn identity_target_skips_wildcard_version() {
        let identity = ServiceIdentity::new("sardines", "agent", "remove", Some("*".into()));
        let filter = RuntimeTarget::ServiceIdentity(identity).filter();
        assert!(filter.conditions().iter().all(|(field, _)| field != "version"));
    }

    #[test]
    fn host_target_reads_resource_table() {
        let target = RuntimeTarget::Host {
            account: "acme".into(),
            name: "web1".into(),
            resource_type: ResourceType::Host,
        };
        assert_eq!(target.table(), Table::Resource);
        assert_eq!(target.filter().conditions().len(), 3);
    }
}
