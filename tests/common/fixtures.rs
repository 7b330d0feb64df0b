//! Test fixtures and builder patterns for MAPI machines and machine sets.

#![allow(dead_code)]

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::{Value, json};

use machine_sync_operator::convert::{ConversionContext, Platform};
use machine_sync_operator::crd::{AuthoritativeApi, mapi};

pub const MAPI_NAMESPACE: &str = "openshift-machine-api";
pub const CAPI_NAMESPACE: &str = "openshift-cluster-api";
pub const INFRASTRUCTURE_NAME: &str = "demo-x7k2p";

/// Conversion inputs for an AWS test cluster.
pub fn conversion_context() -> ConversionContext {
    ConversionContext {
        infrastructure_name: INFRASTRUCTURE_NAME.to_string(),
        platform: Platform::Aws,
        mapi_namespace: MAPI_NAMESPACE.to_string(),
        capi_namespace: CAPI_NAMESPACE.to_string(),
    }
}

/// A minimal AWS provider spec.
pub fn aws_provider_spec(instance_type: &str) -> Value {
    json!({
        "apiVersion": "machine.openshift.io/v1beta1",
        "kind": "AWSMachineProviderConfig",
        "instanceType": instance_type,
        "ami": { "id": "ami-0123456789abcdef0" },
        "placement": { "availabilityZone": "us-east-1a", "region": "us-east-1" },
        "iamInstanceProfile": { "id": "demo-x7k2p-worker-profile" },
        "subnet": { "id": "subnet-0a1b2c3d4e5f67890" }
    })
}

/// Builder for MAPI Machine test fixtures.
///
/// # Example
/// ```
/// let machine = MachineBuilder::new("worker-a")
///     .authority(AuthoritativeApi::ClusterApi)
///     .instance_type("m6i.2xlarge")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct MachineBuilder {
    name: String,
    authority: Option<AuthoritativeApi>,
    instance_type: String,
    labels: BTreeMap<String, String>,
    generation: i64,
}

impl MachineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authority: None,
            instance_type: "m6i.xlarge".to_string(),
            labels: BTreeMap::new(),
            generation: 1,
        }
    }

    /// Set `spec.authoritativeAPI`.
    pub fn authority(mut self, authority: AuthoritativeApi) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = instance_type.into();
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    pub fn spec(&self) -> mapi::MachineSpec {
        mapi::MachineSpec {
            authoritative_api: self.authority,
            provider_spec: mapi::ProviderSpec {
                value: Some(aws_provider_spec(&self.instance_type)),
            },
            ..Default::default()
        }
    }

    pub fn build(self) -> mapi::Machine {
        let mut machine = mapi::Machine::new(&self.name, self.spec());
        machine.metadata.namespace = Some(MAPI_NAMESPACE.to_string());
        machine.metadata.generation = Some(self.generation);
        machine.metadata.uid = Some(format!("uid-{}", self.name));
        if !self.labels.is_empty() {
            *machine.labels_mut() = self.labels;
        }
        machine
    }
}

/// Builder for MAPI MachineSet test fixtures.
#[derive(Clone, Debug)]
pub struct MachineSetBuilder {
    name: String,
    replicas: i32,
    machine: MachineBuilder,
    authority: Option<AuthoritativeApi>,
}

impl MachineSetBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            machine: MachineBuilder::new(name.clone()),
            name,
            replicas: 1,
            authority: None,
        }
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.machine = self.machine.instance_type(instance_type);
        self
    }

    pub fn authority(mut self, authority: AuthoritativeApi) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn build(self) -> mapi::MachineSet {
        let selector = BTreeMap::from([(
            "machine.openshift.io/cluster-api-machineset".to_string(),
            self.name.clone(),
        )]);
        let mut set = mapi::MachineSet::new(
            &self.name,
            mapi::MachineSetSpec {
                replicas: Some(self.replicas),
                selector: machine_sync_operator::crd::LabelSelector {
                    match_labels: selector.clone(),
                },
                template: mapi::MachineTemplateSpec {
                    metadata: machine_sync_operator::crd::ObjectMetaLite {
                        labels: selector,
                        annotations: BTreeMap::new(),
                    },
                    spec: self.machine.spec(),
                },
                authoritative_api: self.authority,
                ..Default::default()
            },
        );
        set.metadata.namespace = Some(MAPI_NAMESPACE.to_string());
        set.metadata.generation = Some(1);
        set.metadata.uid = Some(format!("uid-{}", self.name));
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_builder_defaults() {
        let machine = MachineBuilder::new("worker-a").build();
        assert_eq!(machine.name_any(), "worker-a");
        assert_eq!(machine.spec.authoritative_api, None);
        assert_eq!(machine.metadata.generation, Some(1));
    }

    #[test]
    fn test_machineset_builder_selector_matches_template() {
        let set = MachineSetBuilder::new("worker-a").replicas(3).build();
        assert_eq!(set.spec.replicas, Some(3));
        assert_eq!(
            set.spec.selector.match_labels,
            set.spec.template.metadata.labels
        );
    }
}
