use super::attributes::{AccessQuery, NonResourceQuery, RequestType, ResourceQuery, ResourceRef, Subject};
use super::err::ParseError;
use crate::testcase::TestCaseData;

/// Replaces `records` with the cross-product of `records` × `values`, calling `set`
/// on a copy of each record for each value. An empty `values` leaves `records` as is.
pub fn cross_expand<T: Clone, V>(
    records: Vec<T>,
    values: &[V],
    set: impl Fn(&mut T, &V),
) -> Vec<T> {
    if values.is_empty() {
        return records;
    }
    let mut expanded = Vec::with_capacity(records.len() * values.len());
    for record in records {
        for value in values {
            let mut next = record.clone();
            set(&mut next, value);
            expanded.push(next);
        }
    }
    expanded
}

/// Expands the declarative test case into every concrete query it describes.
///
/// Resource dimensions are expanded in the order namespace, verb, api group,
/// resource, subresource, name; then each request is paired with every user
/// and every group set. A test case with nothing set yields one query with
/// all fields empty.
pub fn expand(data: &TestCaseData) -> Result<Vec<AccessQuery>, ParseError> {
    let requests = if data.is_non_resource() {
        if data.has_resource_dimensions() {
            return Err(ParseError::MixedRequestKinds(
                "resource and non-resource attributes are mutually exclusive".to_string(),
            ));
        }
        expand_non_resource(data)
    } else {
        expand_resource(data)?
    };
    let subjects = expand_subjects(data);

    let mut queries = Vec::with_capacity(requests.len() * subjects.len());
    for request in &requests {
        for subject in &subjects {
            queries.push(AccessQuery {
                subject: subject.clone(),
                request: request.clone(),
            });
        }
    }
    tracing::debug!(
        requests = requests.len(),
        subjects = subjects.len(),
        queries = queries.len(),
        "expanded test case"
    );
    Ok(queries)
}

fn expand_resource(data: &TestCaseData) -> Result<Vec<RequestType>, ParseError> {
    // Parse up front so a malformed entry fails the whole case.
    let resources = data
        .resources
        .iter()
        .map(|r| r.parse::<ResourceRef>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = vec![ResourceQuery::default()];
    records = cross_expand(records, &data.namespaces, |q, v| q.namespace = v.clone());
    records = cross_expand(records, &data.verbs, |q, v| q.verb = v.clone());
    records = cross_expand(records, &data.api_groups, |q, v| q.api_group = v.clone());
    records = cross_expand(records, &resources, |q, v| v.apply_to(q));
    records = cross_expand(records, &data.subresources, |q, v| q.subresource = v.clone());
    records = cross_expand(records, &data.names, |q, v| q.name = v.clone());

    Ok(records.into_iter().map(RequestType::Resource).collect())
}

fn expand_non_resource(data: &TestCaseData) -> Vec<RequestType> {
    let mut records = vec![NonResourceQuery::default()];
    records = cross_expand(records, &data.non_resource_paths, |q, v| q.path = v.clone());
    records = cross_expand(records, &data.non_resource_verbs, |q, v| q.verb = v.clone());
    records.into_iter().map(RequestType::NonResource).collect()
}

fn expand_subjects(data: &TestCaseData) -> Vec<Subject> {
    let mut subjects = vec![Subject::default()];
    subjects = cross_expand(subjects, &data.users, |s, v| s.user = v.clone());
    subjects = cross_expand(subjects, &data.groups, |s, v| s.groups = v.clone());
    subjects
}

#[cfg(test)]
mod test {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn resource_requests(queries: &[AccessQuery]) -> Vec<&ResourceQuery> {
        queries
            .iter()
            .map(|q| match &q.request {
                RequestType::Resource(r) => r,
                RequestType::NonResource(_) => panic!("unexpected non-resource request"),
            })
            .collect()
    }

    #[test]
    fn test_cross_expand() {
        let tests = vec![
            ("empty values is identity", vec![1], vec![], vec![1]),
            ("single record", vec![0], vec![1, 2, 3], vec![1, 2, 3]),
            ("two records", vec![10, 20], vec![1, 2], vec![11, 12, 21, 22]),
        ];
        for (name, records, values, expected) in tests {
            println!("test_name: {name}");
            let got = cross_expand(records, &values, |r: &mut i32, v: &i32| *r += *v);
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_empty_data_yields_baseline_query() {
        let queries = expand(&TestCaseData::default()).unwrap();
        assert_eq!(
            queries,
            vec![AccessQuery {
                subject: Subject::default(),
                request: RequestType::Resource(ResourceQuery::default()),
            }]
        );
    }

    #[test]
    fn test_namespaces_times_verbs() {
        let data = TestCaseData {
            namespaces: strings(&["default", "teapot", "kube-system"]),
            verbs: strings(&["get", "list"]),
            ..Default::default()
        };
        let queries = expand(&data).unwrap();
        assert_eq!(queries.len(), 6);
        for request in resource_requests(&queries) {
            assert!(!request.namespace.is_empty());
            assert!(!request.verb.is_empty());
            assert_eq!(request.api_group, "");
            assert_eq!(request.resource, "");
            assert_eq!(request.subresource, "");
            assert_eq!(request.name, "");
        }
        let pairs: Vec<(&str, &str)> = resource_requests(&queries)
            .iter()
            .map(|r| (r.namespace.as_str(), r.verb.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("default", "get"),
                ("default", "list"),
                ("teapot", "get"),
                ("teapot", "list"),
                ("kube-system", "get"),
                ("kube-system", "list"),
            ]
        );
    }

    #[test]
    fn test_subject_only() {
        let data = TestCaseData {
            users: strings(&["a"]),
            groups: vec![strings(&["g1"])],
            ..Default::default()
        };
        let queries = expand(&data).unwrap();
        assert_eq!(
            queries,
            vec![AccessQuery {
                subject: Subject {
                    user: "a".to_string(),
                    groups: strings(&["g1"]),
                },
                request: RequestType::Resource(ResourceQuery::default()),
            }]
        );
    }

    #[test]
    fn test_group_sets_are_not_merged() {
        let data = TestCaseData {
            users: strings(&["u"]),
            groups: vec![strings(&["A"]), strings(&["B", "C"])],
            ..Default::default()
        };
        let subjects: Vec<Subject> = expand(&data)
            .unwrap()
            .into_iter()
            .map(|q| q.subject)
            .collect();
        assert_eq!(
            subjects,
            vec![
                Subject {
                    user: "u".to_string(),
                    groups: strings(&["A"]),
                },
                Subject {
                    user: "u".to_string(),
                    groups: strings(&["B", "C"]),
                },
            ]
        );
    }

    #[test]
    fn test_users_times_groups_times_requests() {
        let data = TestCaseData {
            users: strings(&["system:serviceaccount:default:default", "system:serviceaccount:other:default"]),
            groups: vec![strings(&["PowerUser"]), strings(&["Manual"]), strings(&["Emergency"])],
            resources: strings(&["apps/statefulsets", "pods"]),
            verbs: strings(&["list"]),
            ..Default::default()
        };
        let queries = expand(&data).unwrap();
        assert_eq!(queries.len(), 2 * 3 * 2);
        // Subjects vary fastest.
        assert_eq!(queries[0].subject.user, "system:serviceaccount:default:default");
        assert_eq!(queries[0].subject.groups, strings(&["PowerUser"]));
        assert_eq!(queries[1].subject.groups, strings(&["Manual"]));
        assert_eq!(queries[3].subject.user, "system:serviceaccount:other:default");
        assert_eq!(queries[0].request, queries[5].request);
        assert_ne!(queries[0].request, queries[6].request);
    }

    #[test]
    fn test_resource_strings_are_split() {
        let data = TestCaseData {
            resources: strings(&["pods", "apps/deployments", "apps/deployments/scale"]),
            ..Default::default()
        };
        let queries = expand(&data).unwrap();
        let got: Vec<(&str, &str, &str)> = resource_requests(&queries)
            .iter()
            .map(|r| (r.api_group.as_str(), r.resource.as_str(), r.subresource.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("", "pods", ""),
                ("apps", "deployments", ""),
                ("apps", "deployments", "scale"),
            ]
        );
    }

    #[test]
    fn test_api_group_and_subresource_dimensions() {
        let data = TestCaseData {
            api_groups: strings(&["apps"]),
            resources: strings(&["daemonsets", "batch/jobs"]),
            subresources: strings(&["status", "finalizers"]),
            names: strings(&["a"]),
            ..Default::default()
        };
        let queries = expand(&data).unwrap();
        let got: Vec<(&str, &str, &str, &str)> = resource_requests(&queries)
            .iter()
            .map(|r| {
                (
                    r.api_group.as_str(),
                    r.resource.as_str(),
                    r.subresource.as_str(),
                    r.name.as_str(),
                )
            })
            .collect();
        assert_eq!(
            got,
            vec![
                ("apps", "daemonsets", "status", "a"),
                ("apps", "daemonsets", "finalizers", "a"),
                ("batch", "jobs", "status", "a"),
                ("batch", "jobs", "finalizers", "a"),
            ]
        );
    }

    #[test]
    fn test_non_resource_expansion() {
        let data = TestCaseData::default()
            .with_non_resource(&["/healthz", "/metrics"], &["get"])
            .with_users(&["test-user"]);
        let queries = expand(&data).unwrap();
        assert_eq!(
            queries.iter().map(|q| q.request.clone()).collect::<Vec<_>>(),
            vec![
                RequestType::NonResource(NonResourceQuery {
                    path: "/healthz".to_string(),
                    verb: "get".to_string(),
                }),
                RequestType::NonResource(NonResourceQuery {
                    path: "/metrics".to_string(),
                    verb: "get".to_string(),
                }),
            ]
        );
    }

    #[test]
    fn test_mixed_request_kinds_are_rejected() {
        let data = TestCaseData {
            non_resource_paths: strings(&["/healthz"]),
            verbs: strings(&["get"]),
            ..Default::default()
        };
        assert!(matches!(
            expand(&data),
            Err(ParseError::MixedRequestKinds(_))
        ));
    }

    #[test]
    fn test_malformed_resource_fails_expansion() {
        let data = TestCaseData {
            resources: strings(&["pods", "a/b/c/d"]),
            ..Default::default()
        };
        assert!(matches!(
            expand(&data),
            Err(ParseError::InvalidResource(_, _))
        ));
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let data = TestCaseData {
            namespaces: strings(&["default", "kube-system"]),
            verbs: strings(&["get", "list", "watch", "create"]),
            resources: strings(&["secrets"]),
            users: strings(&["test-user"]),
            groups: vec![strings(&["ReadOnly"])],
            ..Default::default()
        };
        let first = expand(&data).unwrap();
        assert_eq!(first.len(), 8);
        assert_eq!(first, expand(&data).unwrap());
    }
}
