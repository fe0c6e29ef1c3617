//! Provision command - bring up a device policy, network and attachment
//!
//! Usage: sriov-e2e provision --device <name> [--namespace <ns>] [--network <name>]
//!
//! The created objects are left in place; remove them with `sriov-e2e
//! teardown` or `sriov-e2e reap`.

use clap::Args;
use sriov_common::crd::DeviceType;
use sriov_harness::{NetworkRequest, Provisioned, Provisioner, ProvisioningPlan};

use super::Session;
use crate::{Error, Result};

/// Provision a device policy, network and attachment
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Configured device name (see SRIOV_DEVICES)
    #[arg(short = 'd', long)]
    pub device: String,

    /// Namespace the attachment is rendered into (defaults to the operator namespace)
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Network name (defaults to `<device>-net`)
    #[arg(long)]
    pub network: Option<String>,

    /// Bind VFs to vfio-pci for DPDK instead of the kernel driver
    #[arg(long)]
    pub vfio: bool,

    /// Only create the policy and wait for it to be applied
    #[arg(long)]
    pub policy_only: bool,

    /// Enable VF trust mode
    #[arg(long)]
    pub trust: Option<bool>,

    /// Enable MAC spoof checking
    #[arg(long)]
    pub spoof_check: Option<bool>,

    /// VLAN ID for the network
    #[arg(long)]
    pub vlan: Option<u16>,

    /// MTU set by the policy on the physical function
    #[arg(long)]
    pub mtu: Option<u32>,
}

pub async fn run(session: &Session, args: &ProvisionArgs) -> Result<()> {
    let provisioned = provision(session, args).await?;
    println!("{}", render(&provisioned));
    Ok(())
}

/// Network request described by the arguments
pub fn request(session: &Session, args: &ProvisionArgs) -> NetworkRequest {
    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| session.config.operator_namespace.clone());
    let name = args
        .network
        .clone()
        .unwrap_or_else(|| format!("{}-net", args.device));
    let mut request = NetworkRequest::new(name, namespace);
    if args.vfio {
        request = request.with_device_type(DeviceType::VfioPci);
    }
    if let Some(trust) = args.trust {
        request = request.with_trust(trust);
    }
    if let Some(spoof) = args.spoof_check {
        request = request.with_spoof_check(spoof);
    }
    if let Some(vlan) = args.vlan {
        request = request.with_vlan(vlan, None);
    }
    if let Some(mtu) = args.mtu {
        request = request.with_mtu(mtu);
    }
    request
}

pub async fn provision(session: &Session, args: &ProvisionArgs) -> Result<Provisioned> {
    let device = session.config.device(&args.device).ok_or_else(|| {
        let known: Vec<&str> = session
            .config
            .devices
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        Error::validation(format!(
            "unknown device {:?}, configured devices: {}",
            args.device,
            known.join(", ")
        ))
    })?;
    let plan = if args.policy_only {
        ProvisioningPlan::policy_only()
    } else {
        ProvisioningPlan::full()
    };
    let provisioner = Provisioner::new(
        session.store.clone(),
        session.config.clone(),
        session.cancel.clone(),
    );
    Ok(provisioner
        .provision_with(device, &request(session, args), &plan)
        .await?)
}

fn render(p: &Provisioned) -> String {
    let mut lines = vec![
        format!("device     {}", p.device.name),
        format!("node       {}", p.node),
        format!("interface  {}", p.interface),
        format!("policy     {}", p.policy),
    ];
    if let Some(network) = &p.network {
        lines.push(format!("network    {network}"));
    }
    if let Some(attachment) = &p.attachment {
        lines.push(format!("attachment {attachment}"));
    }
    let capacity = if p.capacity_confirmed {
        "confirmed"
    } else {
        "unconfirmed"
    };
    lines.push(format!("capacity   {capacity}"));
    lines.join("\n")
}
