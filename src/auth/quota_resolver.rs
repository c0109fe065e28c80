//! Exact quota-resolution semantics lifted from the original engine's
//! `get_quotas.py`: a service-information document's `category` must be
//! Group Workspace and a requirement's `status` must be Provisioned before
//! its tape resource amount is accepted as the tape quota.

use crate::error::NldsError;
use serde::{Deserialize, Serialize};

/// `service.category` values. Only `GroupWorkspace` services carry a tape
/// allocation relevant to NLDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCategory {
    GroupWorkspace = 1,
}

/// `requirement.status` values. Only `Provisioned` requirements have been
/// granted and therefore count toward quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementStatus {
    Provisioned = 50,
}

/// A single resource requirement within a service's requirements list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub status: i64,
    pub resource: Resource,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub short_name: String,
}

/// The identity provider's service-description document, as returned from
/// `user_services_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInformation {
    pub category: i64,
    pub requirements: Vec<Requirement>,
}

/// Extract the tape quota (in bytes) from a service-information document,
/// per spec §11: `category == 1` (Group Workspace), a requirement with
/// `status == 50` (provisioned) and `resource.short_name == "tape"`.
pub fn extract_tape_quota(info: &ServiceInformation, service_name: &str) -> Result<u64, NldsError> {
    if info.category != ServiceCategory::GroupWorkspace as i64 {
        return Err(NldsError::NoRequirements {
            service: service_name.to_string(),
        });
    }

    if info.requirements.is_empty() {
        return Err(NldsError::NoRequirements {
            service: service_name.to_string(),
        });
    }

    for requirement in &info.requirements {
        if requirement.status != RequirementStatus::Provisioned as i64 {
            continue;
        }
        if requirement.resource.short_name == "tape" {
            if requirement.amount > 0 {
                return Ok(requirement.amount);
            }
            return Err(NldsError::NoTapeResource {
                service: service_name.to_string(),
            });
        }
    }

    Err(NldsError::NoTapeResource {
        service: service_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioned_tape(amount: u64) -> ServiceInformation {
        ServiceInformation {
            category: 1,
            requirements: vec![Requirement {
                status: 50,
                resource: Resource {
                    short_name: "tape".to_string(),
                },
                amount,
            }],
        }
    }

    #[test]
    fn extracts_provisioned_tape_quota() {
        let info = provisioned_tape(1_000_000);
        assert_eq!(extract_tape_quota(&info, "gws_test").unwrap(), 1_000_000);
    }

    #[test]
    fn rejects_non_group_workspace_category() {
        let mut info = provisioned_tape(1_000_000);
        info.category = 2;
        assert!(extract_tape_quota(&info, "gws_test").is_err());
    }

    #[test]
    fn rejects_unprovisioned_requirement() {
        let mut info = provisioned_tape(1_000_000);
        info.requirements[0].status = 10;
        assert!(matches!(
            extract_tape_quota(&info, "gws_test"),
            Err(NldsError::NoTapeResource { .. })
        ));
    }

    #[test]
    fn rejects_missing_tape_resource() {
        let mut info = provisioned_tape(1_000_000);
        info.requirements[0].resource.short_name = "disk".to_string();
        assert!(matches!(
            extract_tape_quota(&info, "gws_test"),
            Err(NldsError::NoTapeResource { .. })
        ));
    }

    #[test]
    fn rejects_zero_amount() {
        let info = provisioned_tape(0);
        assert!(matches!(
            extract_tape_quota(&info, "gws_test"),
            Err(NldsError::NoTapeResource { .. })
        ));
    }
}
