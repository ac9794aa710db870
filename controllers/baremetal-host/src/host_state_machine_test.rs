//! Unit tests for the host state machine

#[cfg(test)]
mod tests {
    use crate::action_result::ActionResult;
    use crate::host_state_machine::{HostStateMachine, provisioning_cancelled, update_boot_mode_status};
    use crate::metrics::ControllerMetrics;
    use crate::test_utils::*;
    use crds::*;

    async fn reconcile(
        prov: &mut MockProvisioner,
        metrics: &ControllerMetrics,
        info: &mut crate::reconcile_info::ReconcileInfo,
    ) -> ActionResult {
        HostStateMachine::new(prov, metrics, true).reconcile_state(info).await
    }

    #[tokio::test]
    async fn test_provisioning_capacity() {
        struct Case {
            scenario: &'static str,
            has_capacity: bool,
            host: BareMetalHost,
            expected_state: ProvisioningState,
            expected_delayed: bool,
        }

        let cases = vec![
            Case {
                scenario: "transition-to-inspecting-delayed",
                has_capacity: false,
                host: host(ProvisioningState::Registering).build(),
                expected_state: ProvisioningState::Registering,
                expected_delayed: true,
            },
            Case {
                scenario: "transition-to-provisioning-delayed",
                has_capacity: false,
                host: host(ProvisioningState::Ready).build(),
                expected_state: ProvisioningState::Ready,
                expected_delayed: true,
            },
            Case {
                scenario: "transition-to-inspecting-ok",
                has_capacity: true,
                host: host(ProvisioningState::Registering).build(),
                expected_state: ProvisioningState::Inspecting,
                expected_delayed: false,
            },
            Case {
                scenario: "transition-to-provisioning-ok",
                has_capacity: true,
                host: host(ProvisioningState::Ready).build(),
                expected_state: ProvisioningState::Provisioning,
                expected_delayed: false,
            },
            Case {
                scenario: "already-delayed-delayed",
                has_capacity: false,
                host: host(ProvisioningState::Ready)
                    .operational_status(OperationalStatus::Delayed)
                    .build(),
                expected_state: ProvisioningState::Ready,
                expected_delayed: true,
            },
            Case {
                scenario: "already-delayed-ok",
                has_capacity: true,
                host: host(ProvisioningState::Ready)
                    .operational_status(OperationalStatus::Delayed)
                    .build(),
                expected_state: ProvisioningState::Ready,
                expected_delayed: false,
            },
            Case {
                scenario: "untracked-inspecting-delayed",
                has_capacity: false,
                host: host(ProvisioningState::Inspecting).build(),
                expected_state: ProvisioningState::Inspecting,
                expected_delayed: true,
            },
            Case {
                scenario: "untracked-inspecting-ok",
                has_capacity: true,
                host: host(ProvisioningState::Inspecting).build(),
                expected_state: ProvisioningState::MatchProfile,
                expected_delayed: false,
            },
            Case {
                scenario: "untracked-provisioning-delayed",
                has_capacity: false,
                host: host(ProvisioningState::Provisioning).build(),
                expected_state: ProvisioningState::Provisioning,
                expected_delayed: true,
            },
            Case {
                scenario: "untracked-provisioning-ok",
                has_capacity: true,
                host: host(ProvisioningState::Provisioning).build(),
                expected_state: ProvisioningState::Provisioned,
                expected_delayed: false,
            },
        ];

        for case in cases {
            let metrics = ControllerMetrics::new().unwrap();
            let mut prov = MockProvisioner::new();
            prov.set_capacity(case.has_capacity);
            let mut info = make_default_reconcile_info(case.host);

            let result = reconcile(&mut prov, &metrics, &mut info).await;

            assert_eq!(
                info.host.provisioning_state(),
                case.expected_state,
                "{}: unexpected provisioning state",
                case.scenario
            );
            assert_eq!(
                info.host.operational_status() == OperationalStatus::Delayed,
                case.expected_delayed,
                "{}: expected operational status delayed",
                case.scenario
            );
            assert_eq!(
                matches!(result, ActionResult::Delayed),
                case.expected_delayed,
                "{}: expected delayed result",
                case.scenario
            );

            if case.expected_delayed {
                let counter = metrics.delayed_provisioning_counter(&info.request.to_string());
                let initial = counter.get();
                info.run_post_save_callbacks();
                assert!(
                    counter.get() > initial,
                    "{}: delayed counter must move once callbacks run",
                    case.scenario
                );
            }
        }
    }

    #[test]
    fn test_provisioning_cancelled() {
        fn make(spec_image: Option<&str>, online: bool, status_image: Option<&str>) -> BareMetalHost {
            let mut host = BareMetalHost::new(
                "myhost",
                BareMetalHostSpec {
                    online,
                    image: spec_image.map(|url| Image {
                        url: url.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );
            host.metadata.namespace = Some("myns".to_string());
            if let Some(url) = status_image {
                host.status_mut().provisioning.image.url = url.to_string();
            }
            host
        }

        let cases = [
            ("with image url, unprovisioned", make(Some("not-empty"), true, None), false),
            ("with image, unprovisioned", make(Some(""), true, None), true),
            ("without, unprovisioned", make(None, true, None), true),
            ("with image url, offline", make(Some("not-empty"), false, None), false),
            ("provisioned", make(Some("same"), true, Some("same")), false),
            ("removed image", make(None, true, Some("same")), true),
            ("changed image", make(Some("not-empty"), true, Some("also-not-empty")), true),
        ];

        for (scenario, host, expected) in cases {
            assert_eq!(provisioning_cancelled(&host), expected, "{}", scenario);
        }
    }

    #[tokio::test]
    async fn test_error_count_increased_when_provisioner_fails() {
        let cases = [
            ("inspecting", host(ProvisioningState::Inspecting).build()),
            ("ready", host(ProvisioningState::Ready).build()),
            ("deprovisioning", host(ProvisioningState::Deprovisioning).build()),
            (
                "provisioning",
                host(ProvisioningState::Provisioning).image_url("imageSpecUrl").build(),
            ),
            (
                "externallyProvisioned",
                host(ProvisioningState::ExternallyProvisioned)
                    .externally_provisioned()
                    .build(),
            ),
        ];

        for (scenario, host) in cases {
            let metrics = ControllerMetrics::new().unwrap();
            let mut prov = MockProvisioner::new();
            let mut info = make_default_reconcile_info(host);

            prov.set_next_error("some error");
            let result = reconcile(&mut prov, &metrics, &mut info).await;

            assert!(info.host.error_count() > 0, "{}: error count must increase", scenario);
            assert!(result.dirty(), "{}: failure must be persisted", scenario);
        }
    }

    #[tokio::test]
    async fn test_error_count_increased_when_registration_fails() {
        let metrics = ControllerMetrics::new().unwrap();
        let mut prov = MockProvisioner::new();
        let mut info = make_default_reconcile_info(host(ProvisioningState::Registering).build());
        info.host.status_mut().good_credentials = CredentialsStatus::default();

        prov.set_next_error("some error");
        let result = reconcile(&mut prov, &metrics, &mut info).await;

        assert!(info.host.error_count() > 0, "Error count must increase");
        assert!(result.dirty(), "Failure must be persisted");
        assert_eq!(info.host.error_type(), Some(ErrorType::RegistrationError));
    }

    #[tokio::test]
    async fn test_provisioned_registration_failure() {
        let metrics = ControllerMetrics::new().unwrap();
        let mut prov = MockProvisioner::new();
        let mut info = make_default_reconcile_info(host(ProvisioningState::Provisioned).build());

        prov.set_next_error("bmc gone");
        reconcile(&mut prov, &metrics, &mut info).await;

        assert_eq!(info.host.error_type(), Some(ErrorType::ProvisionedRegistrationError));
        assert_eq!(info.host.operational_status(), OperationalStatus::Error);
    }

    #[tokio::test]
    async fn test_error_count_cleared() {
        let cases = [
            ("registering", host(ProvisioningState::Registering).build(), false),
            ("inspecting", host(ProvisioningState::Inspecting).build(), false),
            ("ready", host(ProvisioningState::Ready).build(), true),
            ("deprovisioning", host(ProvisioningState::Deprovisioning).build(), false),
            (
                "provisioning",
                host(ProvisioningState::Provisioning).image_url("imageSpecUrl").build(),
                false,
            ),
        ];

        for (scenario, host, preserve_on_complete) in cases {
            let metrics = ControllerMetrics::new().unwrap();
            let mut prov = MockProvisioner::new();
            let mut info = make_default_reconcile_info(host);
            info.host.status_mut().error_count = 1;

            prov.set_next_result(true);
            let result = reconcile(&mut prov, &metrics, &mut info).await;

            assert_eq!(info.host.error_count(), 1, "{}: in-progress work keeps the count", scenario);
            assert!(result.dirty(), "{}: in-progress work must be persisted", scenario);

            prov.set_next_result(false);
            reconcile(&mut prov, &metrics, &mut info).await;

            let expected = if preserve_on_complete { 1 } else { 0 };
            assert_eq!(info.host.error_count(), expected, "{}: unexpected error count", scenario);
        }
    }

    #[tokio::test]
    async fn test_error_clean() {
        let cases = [
            (
                "clean-after-registration-error",
                host(ProvisioningState::Inspecting)
                    .status_error(ErrorType::RegistrationError, "some error", 1)
                    .build(),
                None,
                false,
            ),
            (
                "not-clean-after-provisioned-registration-error",
                host(ProvisioningState::Inspecting)
                    .status_error(ErrorType::ProvisionedRegistrationError, "some error", 1)
                    .build(),
                None,
                true,
            ),
            (
                "clean-after-creds-change",
                host(ProvisioningState::Ready)
                    .status_error(ErrorType::InspectionError, "some error", 1)
                    .build(),
                Some("NewCreds"),
                false,
            ),
        ];

        for (scenario, host, secret_name, expect_error) in cases {
            let metrics = ControllerMetrics::new().unwrap();
            // no provisioning capacity
            let mut prov = MockProvisioner::default();
            let mut info = make_default_reconcile_info(host);
            if let (Some(name), Some(secret)) = (secret_name, info.bmc_creds_secret.as_mut()) {
                secret.metadata.name = Some(name.to_string());
            }

            reconcile(&mut prov, &metrics, &mut info).await;

            let status = info.host.status.as_ref().unwrap();
            if expect_error {
                assert_eq!(
                    status.error_type,
                    Some(ErrorType::ProvisionedRegistrationError),
                    "{}",
                    scenario
                );
                assert!(!status.error_message.is_empty(), "{}: message must be kept", scenario);
            } else {
                assert_eq!(status.operational_status, OperationalStatus::Ok, "{}", scenario);
                assert_eq!(status.error_type, None, "{}", scenario);
                assert!(status.error_message.is_empty(), "{}: message must be cleared", scenario);
            }
        }
    }

    #[tokio::test]
    async fn test_credentials_change_records_good_credentials() {
        let metrics = ControllerMetrics::new().unwrap();
        let mut prov = MockProvisioner::new();
        let mut info = make_default_reconcile_info(host(ProvisioningState::Provisioned).build());
        if let Some(secret) = info.bmc_creds_secret.as_mut() {
            secret.metadata.resource_version = Some("101".to_string());
        }

        let result = reconcile(&mut prov, &metrics, &mut info).await;
        info.run_post_save_callbacks();

        assert!(matches!(result, ActionResult::Update), "Credentials change is persisted first");
        let status = info.host.status.as_ref().unwrap();
        assert_eq!(status.good_credentials.credentials_version, "101");
        assert_eq!(status.tried_credentials.credentials_version, "101");
        assert_eq!(metrics.credentials_updated_counter().get(), 1);
        assert_eq!(metrics.credentials_validated_counter().get(), 1);
        assert_eq!(info.host.provisioning_state(), ProvisioningState::Provisioned);
    }

    #[tokio::test]
    async fn test_deletion_starts_deprovisioning() {
        let metrics = ControllerMetrics::new().unwrap();
        let mut prov = MockProvisioner::new();
        let mut host = host(ProvisioningState::Provisioned).build();
        host.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        let mut info = make_default_reconcile_info(host);

        let result = reconcile(&mut prov, &metrics, &mut info).await;
        assert!(matches!(result, ActionResult::Complete));
        assert_eq!(info.host.provisioning_state(), ProvisioningState::Deprovisioning);

        // Deprovisioning finishes, then the host drains through deleting
        reconcile(&mut prov, &metrics, &mut info).await;
        assert_eq!(info.host.provisioning_state(), ProvisioningState::Deleting);

        let result = reconcile(&mut prov, &metrics, &mut info).await;
        assert!(matches!(result, ActionResult::Deleted), "Deleting completes once the node is gone");
    }

    #[tokio::test]
    async fn test_state_change_counted_after_save() {
        let metrics = ControllerMetrics::new().unwrap();
        let mut prov = MockProvisioner::new();
        let mut info = make_default_reconcile_info(host(ProvisioningState::MatchProfile).build());

        reconcile(&mut prov, &metrics, &mut info).await;
        let counter = metrics.state_change_counter("match profile", "preparing");
        assert_eq!(counter.get(), 0);

        info.run_post_save_callbacks();
        assert_eq!(counter.get(), 1);
        assert_eq!(info.host.provisioning_state(), ProvisioningState::Preparing);
    }

    #[tokio::test]
    async fn test_unmanaged_without_bmc() {
        let metrics = ControllerMetrics::new().unwrap();
        let mut prov = MockProvisioner::new();
        let mut info = make_default_reconcile_info(host(ProvisioningState::None).build());

        HostStateMachine::new(&mut prov, &metrics, false)
            .reconcile_state(&mut info)
            .await;

        assert_eq!(info.host.provisioning_state(), ProvisioningState::Unmanaged);
    }

    #[tokio::test]
    async fn test_image_change_deprovisions() {
        let cases = [
            (
                "provisioned, image removed",
                host(ProvisioningState::Provisioned).status_image("not-empty").without_image().build(),
            ),
            (
                "provisioned, image changed",
                host(ProvisioningState::Provisioned).status_image("not-empty").image_url("new-image").build(),
            ),
            (
                "provisioning, image removed",
                host(ProvisioningState::Provisioning).without_image().build(),
            ),
            (
                "provisioning, image changed",
                host(ProvisioningState::Provisioning).status_image("not-empty").image_url("new-image").build(),
            ),
        ];

        for (scenario, host) in cases {
            let metrics = ControllerMetrics::new().unwrap();
            let mut prov = MockProvisioner::new();
            let mut info = make_default_reconcile_info(host);

            let result = reconcile(&mut prov, &metrics, &mut info).await;

            assert_eq!(
                info.host.provisioning_state(),
                ProvisioningState::Deprovisioning,
                "{}: unexpected state",
                scenario
            );
            assert!(result.dirty(), "{}: transition must be persisted", scenario);
        }
    }

    #[tokio::test]
    async fn test_image_change_during_deploy_deprovisions() {
        let metrics = ControllerMetrics::new().unwrap();
        let mut prov = MockProvisioner::new();
        prov.set_provision_in_progress();
        let mut info = make_default_reconcile_info(host(ProvisioningState::Provisioning).build());

        let result = reconcile(&mut prov, &metrics, &mut info).await;

        assert!(matches!(result, ActionResult::Continue { .. }), "Deploy still running");
        assert_eq!(
            info.host.status.as_ref().unwrap().provisioning.image.url,
            "not-empty",
            "Image being written must be recorded when the deploy starts"
        );

        info.host.spec.image = Some(Image {
            url: "new-image".to_string(),
            ..Default::default()
        });
        reconcile(&mut prov, &metrics, &mut info).await;

        assert_eq!(info.host.provisioning_state(), ProvisioningState::Deprovisioning);
    }

    #[test]
    fn test_update_boot_mode_status() {
        let cases = [
            ("default", None, None, BootMode::Uefi, true),
            ("set UEFI", Some(BootMode::Uefi), None, BootMode::Uefi, true),
            ("already UEFI", Some(BootMode::Uefi), Some(BootMode::Uefi), BootMode::Uefi, false),
            ("set Legacy", Some(BootMode::Legacy), None, BootMode::Legacy, true),
            ("already Legacy", Some(BootMode::Legacy), Some(BootMode::Legacy), BootMode::Legacy, false),
        ];

        for (scenario, spec_value, status_value, expected_value, expected_change) in cases {
            let mut host = BareMetalHost::new(
                "myhost",
                BareMetalHostSpec {
                    online: true,
                    boot_mode: spec_value,
                    image: Some(Image {
                        url: "not-empty".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );
            let status = host.status_mut();
            status.provisioning.image.url = "also-not-empty".to_string();
            status.provisioning.boot_mode = status_value;

            let changed = update_boot_mode_status(&mut host);

            assert_eq!(changed, expected_change, "{}: unexpected change response", scenario);
            assert_eq!(
                host.status.as_ref().and_then(|s| s.provisioning.boot_mode),
                Some(expected_value),
                "{}",
                scenario
            );
        }
    }
}
