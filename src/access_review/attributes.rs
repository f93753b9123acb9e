use super::err::ParseError;
use std::fmt::Display;
use std::str::FromStr;

/// One concrete authorization probe: a single request shape for a single subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessQuery {
    pub subject: Subject,
    pub request: RequestType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestType {
    Resource(ResourceQuery),
    NonResource(NonResourceQuery),
}

/// The entity whose permissions are probed.
///
/// `groups` is one fixed set of memberships, tested as a unit. Alternative
/// memberships are separate subjects, never merged into one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    // "" (empty) leaves the user unset on the review.
    pub user: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceQuery {
    // "" (empty) means all namespaces for namespaced resources, and is the only
    // valid value for cluster-scoped resources.
    pub namespace: String,

    // kube verb, e.g. get, list, watch, create, update, patch, delete, proxy, impersonate.
    pub verb: String,

    // "" (empty) is the core group.
    pub api_group: String,

    pub resource: String,

    pub subresource: String,

    // "" (empty) means all.
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonResourceQuery {
    pub path: String,
    // lowercased HTTP verb, e.g. get, put, post.
    pub verb: String,
}

/// A resource entry of a test case, in the `group/resource/subresource` shorthand.
///
/// The number of slashes decides which fields are set:
///   - `pods` sets only the resource
///   - `apps/deployments` sets the group and the resource
///   - `apps/deployments/scale` sets group, resource and subresource
///
/// A two-segment entry always reads the first segment as the API group, so
/// `pods/log` is resource `log` in group `pods`, not a subresource of `pods`.
/// Fixtures must spell core subresources with a leading slash (`/pods/log`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub api_group: Option<String>,
    pub resource: String,
    pub subresource: Option<String>,
}

impl ResourceRef {
    /// Writes the segments this entry carries onto `query`, leaving the others untouched.
    pub fn apply_to(&self, query: &mut ResourceQuery) {
        if let Some(api_group) = &self.api_group {
            query.api_group = api_group.clone();
        }
        query.resource = self.resource.clone();
        if let Some(subresource) = &self.subresource {
            query.subresource = subresource.clone();
        }
    }
}

impl FromStr for ResourceRef {
    type Err = ParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [resource] => Ok(ResourceRef {
                api_group: None,
                resource: resource.to_string(),
                subresource: None,
            }),
            [api_group, resource] => Ok(ResourceRef {
                api_group: Some(api_group.to_string()),
                resource: resource.to_string(),
                subresource: None,
            }),
            [api_group, resource, subresource] => Ok(ResourceRef {
                api_group: Some(api_group.to_string()),
                resource: resource.to_string(),
                subresource: Some(subresource.to_string()),
            }),
            _ => Err(ParseError::InvalidResource(
                s.to_string(),
                "expected at most two '/' separators (group/resource/subresource)".to_string(),
            )),
        }
    }
}

impl Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.api_group, &self.subresource) {
            (None, None) => f.write_str(&self.resource),
            (Some(group), None) => write!(f, "{group}/{}", self.resource),
            (Some(group), Some(subresource)) => {
                write!(f, "{group}/{}/{subresource}", self.resource)
            }
            (None, Some(subresource)) => write!(f, "/{}/{subresource}", self.resource),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_resource_ref() {
        let tests = [
            (
                "pods",
                ResourceRef {
                    api_group: None,
                    resource: "pods".to_string(),
                    subresource: None,
                },
            ),
            (
                "apps/deployments",
                ResourceRef {
                    api_group: Some("apps".to_string()),
                    resource: "deployments".to_string(),
                    subresource: None,
                },
            ),
            (
                "apps/deployments/scale",
                ResourceRef {
                    api_group: Some("apps".to_string()),
                    resource: "deployments".to_string(),
                    subresource: Some("scale".to_string()),
                },
            ),
            // Two segments are always group/resource.
            (
                "pods/log",
                ResourceRef {
                    api_group: Some("pods".to_string()),
                    resource: "log".to_string(),
                    subresource: None,
                },
            ),
            // Core group subresource.
            (
                "/pods/log",
                ResourceRef {
                    api_group: Some("".to_string()),
                    resource: "pods".to_string(),
                    subresource: Some("log".to_string()),
                },
            ),
        ];
        for (input, expected) in tests {
            assert_eq!(input.parse::<ResourceRef>().unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn test_parse_resource_ref_too_many_segments() {
        let err = "a/b/c/d".parse::<ResourceRef>().unwrap_err();
        assert!(matches!(err, ParseError::InvalidResource(s, _) if s == "a/b/c/d"));
    }

    #[test]
    fn test_apply_keeps_unset_segments() {
        let mut query = ResourceQuery {
            api_group: "apps".to_string(),
            subresource: "status".to_string(),
            ..Default::default()
        };
        "daemonsets".parse::<ResourceRef>().unwrap().apply_to(&mut query);
        assert_eq!(query.api_group, "apps");
        assert_eq!(query.resource, "daemonsets");
        assert_eq!(query.subresource, "status");

        "rbac.authorization.k8s.io/clusterroles"
            .parse::<ResourceRef>()
            .unwrap()
            .apply_to(&mut query);
        assert_eq!(query.api_group, "rbac.authorization.k8s.io");
        assert_eq!(query.resource, "clusterroles");
        assert_eq!(query.subresource, "status");
    }
}
