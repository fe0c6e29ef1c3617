//! NetworkAttachmentDefinition (Multus), rendered by the operator from a SriovNetwork

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CNI configuration for pods selecting this attachment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    shortname = "net-attach-def",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinitionSpec {
    /// Rendered CNI config JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}
