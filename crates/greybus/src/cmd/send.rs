use std::fs;
use std::time::Duration;

use greybus_transport::SocketClient;

use crate::cmd::SendArgs;
use crate::exit::{transport_error, CliError, CliResult, OPERATION_FAILED, SUCCESS, USAGE};
use crate::output::{print_response, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;

    let mut client =
        SocketClient::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    client
        .set_read_timeout(Some(timeout))
        .map_err(|err| transport_error("connect failed", err))?;

    let response = client
        .request(args.cport, args.op_type, &payload, args.oneshot)
        .map_err(|err| transport_error("request failed", err))?;

    let Some(response) = response else {
        return Ok(SUCCESS);
    };
    print_response(args.cport, &response, format);
    if response.is_success() {
        Ok(SUCCESS)
    } else {
        Ok(OPERATION_FAILED)
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(hex) = &args.hex {
        return decode_hex(hex);
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

/// Decode hex digits, ignoring whitespace and `:` separators.
fn decode_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "--hex needs an even number of digits"));
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| {
                    CliError::new(
                        USAGE,
                        format!("--hex has invalid digits: {}", String::from_utf8_lossy(pair)),
                    )
                })
        })
        .collect()
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}
