//! Network segment command handlers.

use serde::Serialize;
use uuid::Uuid;

use switchboard_core::{
    AddNetwork, ControllerEndpoint, DeleteNetwork, Engine, EngineConfig, NetworkSegment,
    SegmentationId,
};

use crate::cli::{GlobalOpts, NetworkArgs, NetworkCommand, SegmentArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct NetworkResult {
    action: &'static str,
    segmentation_id: u16,
    network_id: Uuid,
    physnet: String,
    switches: Vec<String>,
}

fn segment(args: &SegmentArgs) -> Result<NetworkSegment, CliError> {
    let id = SegmentationId::new(args.segmentation_id)?;
    let segment = NetworkSegment::new(id, args.network_id.unwrap_or_else(Uuid::new_v4));
    Ok(match &args.project {
        Some(project) => segment.with_project(project.clone()),
        None => segment,
    })
}

/// Parse `IP:PORT`.
fn parse_controller(raw: &str) -> Result<ControllerEndpoint, CliError> {
    let invalid = || CliError::Validation {
        field: "controller".into(),
        reason: format!("expected IP:PORT, got '{raw}'"),
    };
    let (ip, port) = raw.rsplit_once(':').ok_or_else(invalid)?;
    if ip.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok(ControllerEndpoint {
        ip: ip.to_owned(),
        port,
    })
}

fn render(global: &GlobalOpts, result: &NetworkResult) -> Result<(), CliError> {
    let out = output::render_single(&global.output, result, |r| {
        format!(
            "Segment {} {} on physnet '{}' ({} switch(es): {})",
            r.segmentation_id,
            r.action,
            r.physnet,
            r.switches.len(),
            r.switches.join(", ")
        )
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle(
    config: &EngineConfig,
    args: NetworkArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let engine = Engine::connect(config).await?;

    match args.command {
        NetworkCommand::Create(create) => {
            let segment = segment(&create.segment)?;
            let op = AddNetwork {
                controller: create
                    .controller
                    .as_deref()
                    .map(parse_controller)
                    .transpose()?,
                vfc_name: create.vfc_name,
                ..AddNetwork::new(segment)
            };
            engine.create_network(&op, &create.segment.physnet).await?;
            render(
                global,
                &NetworkResult {
                    action: "created",
                    segmentation_id: op.segment.segmentation_id.get(),
                    network_id: op.segment.network_id,
                    switches: switch_names(&engine, &create.segment.physnet),
                    physnet: create.segment.physnet,
                },
            )
        }
        NetworkCommand::Delete(delete) => {
            let op = DeleteNetwork {
                segment: segment(&delete)?,
            };
            engine.delete_network(&op, &delete.physnet).await?;
            render(
                global,
                &NetworkResult {
                    action: "deleted",
                    segmentation_id: op.segment.segmentation_id.get(),
                    network_id: op.segment.network_id,
                    switches: switch_names(&engine, &delete.physnet),
                    physnet: delete.physnet,
                },
            )
        }
    }
}

fn switch_names(engine: &Engine, physnet: &str) -> Vec<String> {
    engine
        .router()
        .devices_for_physnet(physnet)
        .filter(|e| e.config.manage_vlans)
        .map(|e| e.name().to_owned())
        .collect()
}
