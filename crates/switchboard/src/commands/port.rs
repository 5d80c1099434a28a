//! Port binding command handlers.

use std::fmt::Write as _;

use serde::Serialize;

use switchboard_core::{
    Engine, EngineConfig, LocalLinkInfo, PortBinding, PortState, SegmentationId,
};

use crate::cli::{BindingArgs, GlobalOpts, PortArgs, PortCommand};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct BindingResult {
    action: &'static str,
    port: String,
    segmentation_id: u16,
    /// `None` when the link points at no managed switch.
    switch: Option<String>,
}

fn binding(args: BindingArgs) -> Result<PortBinding, CliError> {
    if args.link.switch_info.is_none() && args.link.switch_id.is_none() {
        return Err(CliError::Validation {
            field: "link".into(),
            reason: "one of --switch-info or --switch-id is required".into(),
        });
    }
    let segmentation_id = args.segmentation_id.map(SegmentationId::new).transpose()?;
    Ok(PortBinding {
        port_id: args.port_id,
        link: LocalLinkInfo {
            switch_info: args.link.switch_info,
            switch_id: args.link.switch_id,
            port_id: args.port,
        },
        segmentation_id,
    })
}

fn render_binding(global: &GlobalOpts, result: &BindingResult) -> Result<(), CliError> {
    let out = output::render_single(&global.output, result, |r| match &r.switch {
        Some(switch) => format!(
            "Port {} {} segment {} on {switch}",
            r.port, r.action, r.segmentation_id
        ),
        None => format!("Port {} is not on a managed switch; nothing to do", r.port),
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn state_detail(state: &PortState) -> String {
    let mut out = format!("Port:         {}\n", state.port);
    match state.access_vlan {
        Some(vlan) => {
            let _ = writeln!(out, "Access VLAN:  {vlan}");
        }
        None => out.push_str("Access VLAN:  -\n"),
    }
    for t in &state.tunnels {
        let vlan = t.vlan_id.map_or_else(|| "-".to_owned(), |v| v.to_string());
        let _ = writeln!(out, "Tunnel:       {} ofport {} vlan {vlan}", t.bridge, t.ofport);
    }
    if let Some(raw) = &state.raw {
        let _ = write!(out, "\n{}", raw.trim_end());
    }
    out.trim_end().to_owned()
}

pub async fn handle(
    config: &EngineConfig,
    args: PortArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let engine = Engine::connect(config).await?;

    match args.command {
        PortCommand::Plug(args) => {
            let binding = binding(args)?;
            let switch = engine.bind_port(&binding).await?;
            render_binding(
                global,
                &BindingResult {
                    action: "plugged into",
                    segmentation_id: binding.segmentation_id().get(),
                    port: binding.link.port_id,
                    switch,
                },
            )
        }
        PortCommand::Unplug(args) => {
            let binding = binding(args)?;
            let switch = engine.unbind_port(&binding).await?;
            render_binding(
                global,
                &BindingResult {
                    action: "unplugged from",
                    segmentation_id: binding.segmentation_id().get(),
                    port: binding.link.port_id,
                    switch,
                },
            )
        }
        PortCommand::Show(show) => {
            let state = engine.port_state(&show.switch, &show.port).await?;
            let out = output::render_single(&global.output, &state, state_detail)?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use switchboard_core::TunnelBinding;

    use super::*;
    use crate::cli::LinkArgs;

    fn args(switch_info: Option<&str>, segmentation_id: Option<u16>) -> BindingArgs {
        BindingArgs {
            link: LinkArgs {
                switch_info: switch_info.map(str::to_owned),
                switch_id: None,
            },
            port: "Te 0/1".into(),
            segmentation_id,
            port_id: "cli".into(),
        }
    }

    #[test]
    fn binding_needs_a_link_identifier() {
        let err = binding(args(None, Some(10))).unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
    }

    #[test]
    fn binding_without_segment_uses_default_vlan() {
        let b = binding(args(Some("sw1"), None)).unwrap();
        assert_eq!(b.segmentation_id().get(), 1);
        assert_eq!(b.link.port_id, "Te 0/1");
    }

    #[test]
    fn binding_rejects_out_of_range_vlan() {
        assert!(binding(args(Some("sw1"), Some(4095))).is_err());
    }

    #[test]
    fn state_detail_lists_tunnels() {
        let state = PortState {
            port: "7".into(),
            access_vlan: None,
            tunnels: vec![TunnelBinding {
                bridge: "br2".into(),
                ofport: 20007,
                vlan_id: Some(200),
            }],
            raw: None,
        };
        let text = state_detail(&state);
        assert!(text.contains("br2 ofport 20007 vlan 200"), "{text}");
        assert!(text.contains("Access VLAN:  -"));
    }
}
