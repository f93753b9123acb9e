use std::path::Path;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::access_review::{AccessReviewer, Expectation, ReviewError, TestCaseError};
use crate::testcase::{TestCase, TestCaseData};
use crate::util::strings;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file {path}: {error}")]
    Read { path: String, error: std::io::Error },
    #[error("failed to parse scenario file {path}: {error}")]
    Parse {
        path: String,
        error: serde_json::Error,
    },
}

/// The named attribute lists the RBAC matrix is built from.
#[derive(Debug, Clone)]
pub struct Fixtures {
    pub all_groups: Vec<Vec<String>>,
    // Secrets are left out, they have their own cases.
    pub namespaced_resources: Vec<String>,
    // Nodes are left out, they have their own cases.
    pub global_resources: Vec<String>,
    pub read_verbs: Vec<String>,
    pub write_verbs: Vec<String>,
    // default: the default namespace
    // teapot: any other namespace
    // visibility: where collaborators have access
    // kube-system: administrators only
    pub all_namespaces: Vec<String>,
}

impl Fixtures {
    pub fn standard() -> Self {
        Self {
            all_groups: [
                "FooBar",
                "ReadOnly",
                "PowerUser",
                "Emergency",
                "Manual",
                "system:serviceaccounts:kube-system",
                "CollaboratorEmergency",
                "CollaboratorManual",
                "Collaborator24x7",
                "CollaboratorPowerUser",
                "Administrator",
            ]
            .iter()
            .map(|g| vec![g.to_string()])
            .collect(),
            namespaced_resources: strings(&[
                "pods",
                "apps/deployments",
                "apps/statefulsets",
                "apps/deployments/scale",
                "apps/statefulsets/scale",
                "services",
                "persistentvolumeclaims",
                "configmaps",
            ]),
            global_resources: strings(&[
                "namespaces",
                "rbac.authorization.k8s.io/clusterroles",
                "storage.k8s.io/storageclasses",
                "storage.k8s.io/persistentvolumes",
                "apiextensions.k8s.io/customresourcedefinitions",
            ]),
            read_verbs: strings(&["get", "list", "watch"]),
            write_verbs: strings(&["create", "update", "delete", "patch"]),
            all_namespaces: strings(&["default", "teapot", "visibility", "kube-system"]),
        }
    }

    pub fn all_verbs(&self) -> Vec<String> {
        self.read_verbs
            .iter()
            .chain(self.write_verbs.iter())
            .cloned()
            .collect()
    }
}

/// One named test case together with the outcome every query of it must have.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    pub data: TestCaseData,
    pub expect: Expectation,
}

impl Scenario {
    fn new(name: impl Into<String>, data: TestCaseData, expect: Expectation) -> Self {
        Self {
            name: name.into(),
            data,
            expect,
        }
    }
}

/// Builds scenarios sharing a name prefix and a base test case, the way nested
/// setup blocks share state.
struct Context<'a> {
    name: String,
    base: TestCaseData,
    out: &'a mut Vec<Scenario>,
}

impl<'a> Context<'a> {
    fn root(name: &str, base: TestCaseData, out: &'a mut Vec<Scenario>) -> Self {
        Self {
            name: name.to_string(),
            base,
            out,
        }
    }

    fn when(&mut self, name: &str, setup: impl FnOnce(TestCaseData) -> TestCaseData) -> Context<'_> {
        Context {
            name: format!("{} when {name}", self.name),
            base: setup(self.base.clone()),
            out: &mut *self.out,
        }
    }

    fn it(&mut self, name: &str, expect: Expectation, setup: impl FnOnce(TestCaseData) -> TestCaseData) {
        self.out.push(Scenario::new(
            format!("{} {name}", self.name),
            setup(self.base.clone()),
            expect,
        ));
    }
}

fn test_user_in(groups: &[&[&str]]) -> TestCaseData {
    TestCaseData::default()
        .with_groups(groups)
        .with_users(&["test-user"])
}

fn with(mut data: TestCaseData, update: impl FnOnce(&mut TestCaseData)) -> TestCaseData {
    update(&mut data);
    data
}

/// The RBAC matrix of the cluster, as scenarios.
pub fn catalog(fx: &Fixtures) -> Vec<Scenario> {
    use Expectation::{Allow, Deny};

    let mut scenarios = Vec::new();

    {
        let base = TestCaseData::default()
            .with_group_sets(fx.all_groups.clone())
            .with_users(&["test-user"]);
        let mut ctx = Context::root("For all groups", base, &mut scenarios);
        {
            let mut verb = ctx.when("the verb is impersonate", |d| d.with_verbs(&["impersonate"]));
            verb.it("should deny access for users and groups", Deny, |d| {
                d.with_resources(&["users", "groups"])
            });
            verb.it("should deny access for service accounts", Deny, |d| {
                with(d.with_resources(&["serviceaccounts"]), |d| {
                    d.namespaces = fx.all_namespaces.clone()
                })
            });
        }
        {
            let mut verb = ctx.when("the verb is escalate", |d| d.with_verbs(&["escalate"]));
            verb.it("should deny access for cluster roles", Deny, |d| {
                d.with_resources(&["rbac.authorization.k8s.io/clusterroles"])
            });
            verb.it("should deny access for roles in all namespaces", Deny, |d| {
                with(d.with_resources(&["rbac.authorization.k8s.io/roles"]), |d| {
                    d.namespaces = fx.all_namespaces.clone()
                })
            });
        }
    }

    {
        let mut ctx = Context::root("For ReadOnly group", test_user_in(&[&["ReadOnly"]]), &mut scenarios);
        ctx.when("the resource is a Secret", |d| d.with_resources(&["secrets"]))
            .it("should deny access in all namespaces", Deny, |d| {
                with(d, |d| {
                    d.verbs = fx.all_verbs();
                    d.namespaces = fx.all_namespaces.clone();
                })
            });
        {
            let mut other = ctx.when("the resource is not a Secret resource", |d| {
                with(d, |d| {
                    d.resources = fx.namespaced_resources.clone();
                    d.namespaces = fx.all_namespaces.clone();
                })
            });
            other.it("should allow read access in all namespaces", Allow, |d| {
                with(d, |d| d.verbs = fx.read_verbs.clone())
            });
            other.it("should deny write access in all namespaces", Deny, |d| {
                with(d, |d| d.verbs = fx.write_verbs.clone())
            });
        }
        {
            let mut global = ctx.when("the resource is a global resource", |d| {
                with(d, |d| {
                    d.resources = fx.global_resources.clone();
                    d.resources.push("nodes".to_string());
                })
            });
            global.it("should allow read access", Allow, |d| {
                with(d, |d| d.verbs = fx.read_verbs.clone())
            });
            global.it("should deny write access", Deny, |d| {
                with(d, |d| d.verbs = fx.write_verbs.clone())
            });
        }
    }

    {
        let base = test_user_in(&[&["PowerUser"], &["Manual"], &["Emergency"]]);
        let mut ctx = Context::root("For PowerUser, Manual and Emergency groups", base, &mut scenarios);
        ctx.it(
            "should deny read access to Secrets in kube-system and visibility namespaces",
            Deny,
            |d| {
                with(
                    d.with_resources(&["secrets"])
                        .with_namespaces(&["kube-system", "visibility"]),
                    |d| d.verbs = fx.read_verbs.clone(),
                )
            },
        );
        ctx.it("should deny write access to Nodes", Deny, |d| {
            with(d.with_resources(&["nodes"]), |d| d.verbs = fx.write_verbs.clone())
        });
        ctx.it("should deny write access to DaemonSets", Deny, |d| {
            with(d.with_resources(&["apps/daemonsets"]), |d| {
                d.verbs = fx.write_verbs.clone()
            })
        });
        ctx.it("should allow deleting CRDs", Allow, |d| {
            d.with_resources(&["apiextensions.k8s.io/customresourcedefinitions"])
                .with_verbs(&["delete"])
        });
        ctx.it(
            "should deny deleting kube-system or visibility namespaces",
            Deny,
            |d| {
                d.with_resources(&["namespaces"])
                    .with_namespaces(&["kube-system", "visibility"])
                    .with_verbs(&["delete"])
            },
        );
        {
            let mut namespaced = ctx.when("the resource is a namespaced resource", |d| {
                with(d, |d| {
                    d.resources = fx.namespaced_resources.clone();
                    d.verbs = fx.write_verbs.clone();
                })
            });
            namespaced.it(
                "should deny write access in kube-system and visibility namespaces",
                Deny,
                |d| d.with_namespaces(&["kube-system", "visibility"]),
            );
            namespaced.it(
                "should allow write access in namespaces other than kube-system and visibility",
                Allow,
                |d| d.with_namespaces(&["default", "teapot"]),
            );
        }
        {
            let mut global = ctx.when("the resource is a global resource", |d| {
                with(d, |d| d.verbs = fx.write_verbs.clone())
            });
            global.it("should deny write access to Nodes", Deny, |d| {
                d.with_resources(&["nodes"])
            });
            global.it("should allow write access to resources other than Nodes", Allow, |d| {
                with(d, |d| d.resources = fx.global_resources.clone())
            });
        }
    }

    {
        // Collaborators escalate into their respective group, so both are members.
        let base = test_user_in(&[
            &["CollaboratorPowerUser", "PowerUser"],
            &["CollaboratorManual", "Manual"],
            &["CollaboratorEmergency", "Emergency"],
        ]);
        let mut ctx = Context::root(
            "For CollaboratorPowerUser, CollaboratorManual and CollaboratorEmergency groups",
            base,
            &mut scenarios,
        );
        {
            let mut secrets = ctx.when("the resource is a Secret", |d| {
                with(d.with_resources(&["secrets"]), |d| d.verbs = fx.read_verbs.clone())
            });
            secrets.it("should allow read access to visibility namespace", Allow, |d| {
                d.with_namespaces(&["visibility"])
            });
            secrets.it("should deny read access to kube-system namespace", Deny, |d| {
                d.with_namespaces(&["kube-system"])
            });
        }
        ctx.it("should deny write access to Nodes", Deny, |d| {
            with(d.with_resources(&["nodes"]), |d| d.verbs = fx.write_verbs.clone())
        });
        ctx.it("should allow write access to DaemonSets", Allow, |d| {
            with(
                d.with_resources(&["apps/daemonsets"])
                    .with_namespaces(&["visibility"]),
                |d| d.verbs = fx.write_verbs.clone(),
            )
        });
        ctx.it("should allow deletion of CRDs", Allow, |d| {
            d.with_resources(&["apiextensions.k8s.io/customresourcedefinitions"])
                .with_verbs(&["delete"])
        });
        ctx.it(
            "should deny deletion of kube-system or visibility namespaces",
            Deny,
            |d| {
                d.with_resources(&["namespaces"])
                    .with_names(&["kube-system", "visibility"])
                    .with_verbs(&["delete"])
            },
        );
        {
            let mut namespaced = ctx.when("the resource is a namespaced resource", |d| {
                with(d, |d| {
                    d.resources = fx.namespaced_resources.clone();
                    d.verbs = fx.write_verbs.clone();
                })
            });
            namespaced.it("should deny write access in kube-system namespace", Deny, |d| {
                d.with_namespaces(&["kube-system"])
            });
            namespaced.it(
                "should allow write access in namespaces other than kube-system",
                Allow,
                |d| d.with_namespaces(&["default", "teapot"]),
            );
        }
        {
            let mut global = ctx.when("the resource is a global resource", |d| {
                with(d, |d| d.verbs = fx.write_verbs.clone())
            });
            global.it("should deny access to Nodes", Deny, |d| d.with_resources(&["nodes"]));
            global.it("should allow access to resources other than Nodes", Allow, |d| {
                with(d, |d| d.resources = fx.global_resources.clone())
            });
        }
    }

    {
        let mut ctx = Context::root("For system users", TestCaseData::default(), &mut scenarios);
        ctx.when("the user is kubelet", |d| {
            d.with_groups(&[&["system:masters"]]).with_users(&["kubelet"])
        })
        .it("should allow to get Pods", Allow, |d| {
            d.with_resources(&["pods"])
                .with_verbs(&["get"])
                .with_namespaces(&["teapot"])
        });
        {
            let mut sa = ctx.when("the service account is daemonset-controller", |d| {
                d.with_users(&["system:serviceaccount:kube-system:daemon-set-controller"])
                    .with_groups(&[&["system:serviceaccounts:kube-system"]])
            });
            sa.it("should allow to update DaemonSet status subresource", Allow, |d| {
                d.with_resources(&["apps/daemonsets/status"])
                    .with_verbs(&["update"])
            });
            sa.it("should allow to update DaemonSet finalizers", Allow, |d| {
                d.with_resources(&["apps/daemonsets/finalizers"])
                    .with_verbs(&["update"])
            });
        }
        ctx.when("the service account is the default service account", |d| {
            d.with_users(&[
                "system:serviceaccount:default:default",
                "system:serviceaccount:non-default:default",
            ])
        })
        .it("should deny to list StatefulSets", Deny, |d| {
            d.with_resources(&["apps/statefulsets"]).with_verbs(&["list"])
        });
        {
            let mut sa = ctx.when("the service account is persistent-volume-binder", |d| {
                d.with_users(&["system:serviceaccount:kube-system:persistent-volume-binder"])
                    .with_groups(&[&["system:serviceaccounts:kube-system"]])
                    .with_namespaces(&["kube-system"])
            });
            sa.it("should allow to update PersistentVolumeClaims", Allow, |d| {
                d.with_resources(&["persistentvolumeclaims"])
                    .with_verbs(&["update"])
            });
            sa.it("should allow to create PersistentVolumes", Allow, |d| {
                d.with_resources(&["persistentvolumes"])
                    .with_verbs(&["create"])
            });
        }
        ctx.when("the service account is aws-cloud-provider", |d| {
            d.with_users(&["system:serviceaccount:kube-system:aws-cloud-provider"])
                .with_groups(&[&["system:serviceaccounts:kube-system"]])
        })
        .it("should allow to patch Nodes", Allow, |d| {
            d.with_resources(&["nodes"]).with_verbs(&["patch"])
        });
        {
            let mut sa = ctx.when("the service account is api-monitoring-controller", |d| {
                d.with_users(&["system:serviceaccount:api-infrastructure:api-monitoring-controller"])
            });
            let mut ns = sa.when("the namespace is kube-system", |d| {
                d.with_namespaces(&["kube-system"])
            });
            ns.it(
                "should allow to update 'skipper-default-filters' ConfigMap",
                Allow,
                |d| {
                    d.with_resources(&["configmaps"])
                        .with_verbs(&["update"])
                        .with_names(&["skipper-default-filters"])
                },
            );
            // Without a name this is undecided rather than denied, which counts as denied.
            ns.it("should deny to update any other ConfigMap", Deny, |d| {
                d.with_resources(&["configmaps"]).with_verbs(&["update"])
            });
        }
        {
            let mut user = ctx.when("the user is k8sapi_credentials-provider", |d| {
                d.with_users(&["zalando-iam:zalando:service:k8sapi_credentials-provider"])
                    .with_resources(&["secrets"])
                    .with_namespaces(&["kube-system"])
            });
            user.it(
                "should not allow to delete secrets in kube-system namespace",
                Deny,
                |d| d.with_verbs(&["delete"]),
            );
            user.it(
                "should allow all non-delete operations on secrets in kube-system namespace",
                Allow,
                |d| d.with_verbs(&["get", "list", "watch", "create", "update", "patch"]),
            );
        }
        ctx.when("the user is stups_cdp-controller", |d| {
            d.with_users(&["zalando-iam:zalando:service:stups_cdp-controller"])
        })
        .when("the namespace is kube-system", |d| {
            d.with_namespaces(&["kube-system"])
        })
        .it("should deny to get Secrets", Deny, |d| {
            d.with_resources(&["secrets"]).with_verbs(&["get"])
        });
    }

    {
        let base = TestCaseData::default()
            .with_groups(&[&["system:masters"]])
            .with_users(&["nmalik"]);
        let mut ctx = Context::root("For administrators", base, &mut scenarios);
        {
            let mut ns = ctx.when("namespace is kube-system", |d| d.with_namespaces(&["kube-system"]));
            ns.when("the resource is a Secret", |d| d.with_resources(&["secrets"]))
                .it("should allow read and write access", Allow, |d| {
                    with(d, |d| d.verbs = fx.all_verbs())
                });
            ns.when("the resource is not a Secret", |d| {
                with(d, |d| d.resources = fx.namespaced_resources.clone())
            })
            .it("should allow read and write access", Allow, |d| {
                with(d, |d| d.verbs = fx.all_verbs())
            });
        }
        {
            let mut ns = ctx.when("namespace is not kube-system", |d| d.with_namespaces(&["teapot"]));
            ns.it("should allow to proxy", Allow, |d| d.with_verbs(&["proxy"]));
            ns.when("the resource is a Secret", |d| d.with_resources(&["secrets"]))
                .it("should allow read access", Allow, |d| {
                    with(d, |d| d.verbs = fx.read_verbs.clone())
                });
            ns.when("the resource is not a Secret", |d| {
                with(d, |d| d.resources = fx.namespaced_resources.clone())
            })
            .it("should allow write access", Allow, |d| {
                with(d, |d| d.verbs = fx.write_verbs.clone())
            });
        }
    }

    scenarios
}

/// Reads additional scenarios from a JSON array.
pub fn load_scenarios(path: impl AsRef<Path>) -> Result<Vec<Scenario>, ScenarioError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|error| ScenarioError::Read {
        path: path.display().to_string(),
        error,
    })?;
    serde_json::from_str(&content).map_err(|error| ScenarioError::Parse {
        path: path.display().to_string(),
        error,
    })
}

#[derive(Debug)]
pub enum ScenarioResult {
    Passed,
    Failed(String),
    Errored(TestCaseError),
}

#[derive(Debug, Default)]
pub struct SuiteReport {
    pub results: Vec<(String, ScenarioResult)>,
    pub cancelled: bool,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, r)| matches!(r, ScenarioResult::Passed))
            .count()
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.passed() == self.results.len()
    }
}

/// Runs every scenario in order. A failed submission only fails its own
/// scenario; cancellation stops the suite.
#[instrument(skip_all, fields(scenarios = scenarios.len()))]
pub async fn run_scenarios<R: AccessReviewer>(
    reviewer: &R,
    scenarios: Vec<Scenario>,
    cancel: &CancellationToken,
) -> SuiteReport {
    let mut report = SuiteReport::default();
    for scenario in scenarios {
        let mut tc = TestCase::new(scenario.data);
        let result = match tc.run(reviewer, scenario.expect, cancel).await {
            Ok(()) if tc.output.passed => {
                info!(scenario = %scenario.name, queries = tc.output.evaluated, "passed");
                ScenarioResult::Passed
            }
            Ok(()) => {
                warn!(scenario = %scenario.name, "failed\n{}", tc.output);
                ScenarioResult::Failed(tc.output.to_string())
            }
            Err(TestCaseError::Review(ReviewError::Cancelled(_))) => {
                warn!(scenario = %scenario.name, "cancelled");
                report.cancelled = true;
                break;
            }
            Err(e) => {
                error!(scenario = %scenario.name, "errored: {e}");
                ScenarioResult::Errored(e)
            }
        };
        report.results.push((scenario.name, result));
    }
    report
}
