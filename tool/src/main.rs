use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;

use cfam_common::access::DEFAULT_SYSFS_ROOT;
use cfam_common::registers::CFAM_FIELDS;
use cfam_common::{BmcState, CfamAccess, Field, RetryPolicy, Role, SysFs, SysFsImpl};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    display: bool,
    show_help: bool,
    sysfs_root: PathBuf,
    local_link: usize,
    sibling_link: usize,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            display: false,
            show_help: false,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            local_link: 0,
            sibling_link: 1,
        }
    }
}

fn main() {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    let exit_code = run(std::env::args_os(), SysFsImpl, &mut stdout, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run<I, S, W, E>(args: I, sysfs: S, out: &mut W, err: &mut E) -> i32
where
    I: IntoIterator<Item = OsString>,
    S: SysFs + Clone,
    W: Write,
    E: Write,
{
    let options = match parse_args(args) {
        Ok(options) => options,
        Err(message) => {
            let _ = writeln!(err, "error: {message}");
            let _ = write_usage(err);
            return 2;
        }
    };

    if options.show_help || !options.display {
        return match write_usage(out) {
            Ok(()) => 0,
            Err(_) => 1,
        };
    }

    let links = [
        ("Local BMC", options.local_link),
        ("Sibling BMC", options.sibling_link),
    ];
    for (i, (name, link)) in links.into_iter().enumerate() {
        if i > 0 && writeln!(out).is_err() {
            return 1;
        }

        let access = CfamAccess::new(link, sysfs.clone())
            .with_root(&options.sysfs_root)
            .with_retry(RetryPolicy::Once);
        if display_fields(name, &access, out, err).is_err() {
            return 1;
        }
    }

    0
}

fn parse_args<I>(args: I) -> Result<CliOptions, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let _argv0 = iter.next();
    let mut options = CliOptions::default();

    while let Some(argument) = iter.next() {
        let arg = argument.to_string_lossy();
        match arg.as_ref() {
            "-h" | "--help" => options.show_help = true,
            "-d" | "--display" => options.display = true,
            "--sysfs-root" => {
                let next = iter
                    .next()
                    .ok_or_else(|| String::from("missing path for `--sysfs-root`"))?;
                options.sysfs_root = PathBuf::from(next);
            }
            "--local-link" => options.local_link = parse_link(iter.next(), "--local-link")?,
            "--sibling-link" => options.sibling_link = parse_link(iter.next(), "--sibling-link")?,
            other => return Err(format!("unknown argument `{other}`")),
        }
    }

    Ok(options)
}

fn parse_link(value: Option<OsString>, flag: &str) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("missing link number for `{flag}`"))?;
    let text = value.to_string_lossy();
    text.parse()
        .map_err(|_| format!("invalid link number `{text}` for `{flag}`"))
}

fn write_usage<W: Write + ?Sized>(out: &mut W) -> io::Result<()> {
    writeln!(out, "RBMC CFAM-S Tool")?;
    writeln!(out, "Usage: cfam-tool [OPTIONS]")?;
    writeln!(out)?;
    writeln!(out, "  -d, --display           Display CFAM-S scratch pad register contents")?;
    writeln!(out, "      --sysfs-root <path> FSI master sysfs directory [default: {DEFAULT_SYSFS_ROOT}]")?;
    writeln!(out, "      --local-link <n>    FSI link of the local CFAM [default: 0]")?;
    writeln!(out, "      --sibling-link <n>  FSI link of the sibling CFAM [default: 1]")?;
    writeln!(out, "  -h, --help              Show this help")
}

fn format_value(field: Field, value: u32) -> String {
    match field {
        Field::ApiVersion | Field::BmcPosition | Field::Heartbeat | Field::FwVersion => {
            format!("{value:#x}")
        }
        Field::RedundancyEnabled
        | Field::FailoversPaused
        | Field::Provisioned
        | Field::SiblingCommsOk => (value != 0).to_string(),
        Field::Role => match Role::try_from(value) {
            Ok(role) => role.to_string(),
            Err(raw) => format!("{raw:#x} (unknown)"),
        },
        Field::BmcState => match BmcState::try_from(value) {
            Ok(state) => state.to_string(),
            Err(raw) => format!("{raw:#x} (unknown)"),
        },
    }
}

/// Prints every field of one CFAM. Stops at the first read failure, which
/// goes to `err`. Only failures to write the output are returned.
fn display_fields<S, W, E>(name: &str, access: &CfamAccess<S>, out: &mut W, err: &mut E) -> io::Result<()>
where
    S: SysFs,
    W: Write + ?Sized,
    E: Write + ?Sized,
{
    writeln!(out, "{name} CFAM-S scratchpad fields")?;

    for (field, meta) in CFAM_FIELDS.iter() {
        let value = match access.read_field(*field) {
            Ok(value) => value,
            Err(e) => {
                writeln!(err, "Unable to read {name} CFAM-S ({e})")?;
                return Ok(());
            }
        };

        let label = format!("{}:", meta.desc);
        writeln!(out, "{label:26} {}", format_value(*field, value))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfam_common::ScratchPadReg;
    use cfam_sim::{Backplane, CARD_A, CARD_B};

    fn args(list: &[&str]) -> Vec<OsString> {
        std::iter::once("cfam-tool")
            .chain(list.iter().copied())
            .map(OsString::from)
            .collect()
    }

    fn line(label: &str, value: &str) -> String {
        format!("{:26} {value}\n", format!("{label}:"))
    }

    fn run_tool(backplane: &Backplane, list: &[&str]) -> (i32, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run(args(list), backplane.sysfs_for(CARD_A), &mut out, &mut err);
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(Field::ApiVersion, 1), "0x1");
        assert_eq!(format_value(Field::FwVersion, 0x1234_5678), "0x12345678");
        assert_eq!(format_value(Field::Provisioned, 1), "true");
        assert_eq!(format_value(Field::SiblingCommsOk, 0), "false");
        assert_eq!(format_value(Field::Role, 2), "Passive");
        assert_eq!(format_value(Field::Role, 3), "0x3 (unknown)");
        assert_eq!(format_value(Field::BmcState, 3), "Quiesced");
        assert_eq!(format_value(Field::BmcState, 7), "0x7 (unknown)");
    }

    #[test]
    fn test_parse_args() {
        let options = parse_args(args(&["-d", "--sysfs-root", "/tmp/fsi", "--sibling-link", "3"])).unwrap();
        assert!(options.display);
        assert_eq!(options.sysfs_root, PathBuf::from("/tmp/fsi"));
        assert_eq!(options.local_link, 0);
        assert_eq!(options.sibling_link, 3);

        assert!(parse_args(args(&["--local-link", "x"])).is_err());
        assert!(parse_args(args(&["--local-link"])).is_err());
        assert!(parse_args(args(&["-q"])).is_err());
    }

    #[test]
    fn test_usage_without_display() {
        let backplane = Backplane::pair();
        let (code, out, err) = run_tool(&backplane, &[]);
        assert_eq!(code, 0);
        assert!(out.starts_with("RBMC CFAM-S Tool"));
        assert!(err.is_empty());

        let (code, _, err) = run_tool(&backplane, &["--bogus"]);
        assert_eq!(code, 2);
        assert!(err.starts_with("error: unknown argument `--bogus`"));
    }

    #[test]
    fn test_display() {
        let backplane = Backplane::pair();
        backplane.set_reg(CARD_A, ScratchPadReg::One, 0x01DD_FFFF);
        backplane.set_reg(CARD_A, ScratchPadReg::Two, 0x1234_5678);
        backplane.set_reg(CARD_B, ScratchPadReg::One, 0x0160_0000);

        let (code, out, err) = run_tool(&backplane, &["-d"]);
        assert_eq!(code, 0);
        assert!(err.is_empty());

        let expected = [
            "Local BMC CFAM-S scratchpad fields\n".to_string(),
            line("API Version", "0x1"),
            line("BMC Position", "0x1"),
            line("Role", "Passive"),
            line("Redundancy Enabled", "true"),
            line("Failovers Paused", "true"),
            line("Provisioned", "true"),
            line("BMC State", "Quiesced"),
            line("Sibling Communication OK", "true"),
            line("Heartbeat", "0xff"),
            line("FW Version", "0x12345678"),
            "\n".to_string(),
            "Sibling BMC CFAM-S scratchpad fields\n".to_string(),
            line("API Version", "0x1"),
            line("BMC Position", "0x0"),
            line("Role", "0x3 (unknown)"),
            line("Redundancy Enabled", "false"),
            line("Failovers Paused", "false"),
            line("Provisioned", "false"),
            line("BMC State", "Ready"),
            line("Sibling Communication OK", "false"),
            line("Heartbeat", "0x0"),
            line("FW Version", "0x0"),
        ]
        .concat();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_read_failure_skips_link() {
        let backplane = Backplane::pair();
        backplane.unbind(CARD_A);
        backplane.set_reg(CARD_B, ScratchPadReg::Two, 0xABCD);

        let (code, out, err) = run_tool(&backplane, &["-d"]);
        assert_eq!(code, 0);
        assert!(err.starts_with("Unable to read Local BMC CFAM-S ("));
        assert!(out.starts_with("Local BMC CFAM-S scratchpad fields\n\nSibling BMC"));
        assert!(out.contains(&line("FW Version", "0xabcd")));
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let backplane = Backplane::pair();
        backplane.fail_next_reads(CARD_B, 1);

        let (_, out, err) = run_tool(&backplane, &["-d"]);
        assert!(err.is_empty());
        assert!(out.contains("Sibling BMC CFAM-S scratchpad fields"));
    }
}
