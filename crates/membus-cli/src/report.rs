//! Text reports over a built [`Machine`].

use std::fmt::Write as _;

use membus_core::{AccessKind, AddressSpace, Offset};

use crate::errors::CliError;
use crate::machine::Machine;

/// Dumps the `kind` table of the named space, or of every space when `space` is `None`.
///
/// # Errors
///
/// Returns [`CliError::UnknownSpace`] when `space` names no space.
pub fn dump(machine: &Machine, space: Option<&str>, kind: AccessKind) -> Result<String, CliError> {
    let selected: Vec<&AddressSpace> = match space {
        Some(_) => vec![machine.space(space)?],
        None => machine.spaces().iter().collect(),
    };
    let mut out = String::new();
    for space in selected {
        let _ = writeln!(out, "space '{}':", space.name());
        let _ = writeln!(out, "{}", space.dump_map(kind));
    }
    Ok(out)
}

/// Reads one native unit at each logical address and reports the value and the handler that
/// answered.
///
/// # Errors
///
/// Returns [`CliError::UnknownSpace`] when `space` names no space.
pub fn probe(
    machine: &Machine,
    space: Option<&str>,
    addresses: &[Offset],
) -> Result<String, CliError> {
    let space = machine.space(space)?;
    let config = space.config();
    let width = config.data_width;
    let digits = (width.bytes() * 2) as usize;
    let mut out = String::new();
    for &address in addresses {
        let byteaddress = config.address_to_byte(address) & space.byte_mask();
        let value = space.read(byteaddress, width, width.mask());
        let entry = space.lookup(AccessKind::Read, byteaddress);
        let _ = writeln!(
            out,
            "{}:{address:08X} = {value:0digits$X} ({})",
            space.name(),
            space.handler_name(AccessKind::Read, entry)
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{dump, probe};
    use crate::machine::{Machine, MachineFile};
    use membus_core::AccessKind;

    fn machine() -> Machine {
        let file = MachineFile::parse(
            r#"{
                "ports": [{ "name": "DSW", "value": "0x5A" }],
                "spaces": [
                    {
                        "name": "program",
                        "data_width": 8,
                        "address_width": 16,
                        "ranges": [
                            { "start": "0x4000", "end": "0x4000", "read": { "port": "DSW" } },
                            { "start": "0x8000", "end": "0x80FF", "read": "no_op" }
                        ]
                    },
                    { "name": "io", "data_width": 8, "address_width": 8, "unmap_value": 0 }
                ]
            }"#,
        )
        .expect("parse");
        Machine::build(&file).expect("build")
    }

    #[test]
    fn probe_reports_value_and_handler() {
        let machine = machine();
        let report = probe(&machine, None, &[0x4000, 0x8010, 0x0000]).expect("probe");
        let lines: Vec<_> = report.lines().collect();
        assert!(lines[0].starts_with("program:00004000 = 5A"));
        assert!(lines[1].starts_with("program:00008010 = FF (nop)"));
        assert!(lines[2].starts_with("program:00000000 = FF (unmapped)"));

        let io = probe(&machine, Some("io"), &[0x10]).expect("probe io");
        assert!(io.starts_with("io:00000010 = 00 (unmapped)"));
    }

    #[test]
    fn dump_covers_selected_spaces() {
        let machine = machine();
        let all = dump(&machine, None, AccessKind::Read).expect("dump");
        assert!(all.contains("space 'program':"));
        assert!(all.contains("space 'io':"));

        let writes = dump(&machine, Some("io"), AccessKind::Write).expect("dump io");
        assert!(writes.contains("write table:"));
        assert!(!writes.contains("space 'program':"));
        assert!(dump(&machine, Some("sound"), AccessKind::Read).is_err());
    }
}
