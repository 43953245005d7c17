//! Ports command - list serial ports

use anyhow::Result;
use ewater_link::transport::list_ports;

use crate::output::{OutputContext, PortRow};

pub fn ports(ctx: &OutputContext) -> Result<()> {
    let rows: Vec<PortRow> = list_ports()?
        .into_iter()
        .map(|port| PortRow {
            port: port.name,
            description: port.description.unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    ctx.print(&rows);
    Ok(())
}
