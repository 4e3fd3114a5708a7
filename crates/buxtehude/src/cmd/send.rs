use std::sync::mpsc;
use std::time::Duration;

use buxtehude_frame::Envelope;
use buxtehude_peer::{initialise, Client, ClientPreferences};
use serde_json::Value;

use crate::cmd::SendArgs;
use crate::exit::{connect_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};

pub fn run(args: SendArgs) -> CliResult<i32> {
    initialise();

    let content = match &args.content {
        Some(raw) => serde_json::from_str::<Value>(raw)
            .map_err(|err| CliError::new(USAGE, format!("--content is not valid JSON: {err}")))?,
        None => Value::Null,
    };
    let wait_timeout = parse_duration(&args.wait_timeout)?;

    let client = Client::new(ClientPreferences::team(&args.team));
    match (&args.local, &args.tcp) {
        (Some(path), None) => client
            .connect_local(path)
            .map_err(|err| connect_error("connect failed", err))?,
        (None, Some(endpoint)) => {
            let (host, port) = parse_endpoint(endpoint)?;
            client
                .connect_tcp(&host, port)
                .map_err(|err| connect_error("connect failed", err))?;
        }
        _ => return Err(CliError::new(USAGE, "pass exactly one of --local or --tcp")),
    }

    let reply = args.wait.as_ref().map(|reply_type| {
        let (tx, rx) = mpsc::channel();
        client.add_handler(reply_type.clone(), move |_, envelope: &Envelope| {
            let _ = tx.send(envelope.clone());
        });
        rx
    });

    let envelope = Envelope {
        msg_type: args.msg_type.clone(),
        dest: args.dest.clone().unwrap_or_default(),
        only_first: args.only_first,
        content,
        ..Envelope::default()
    };
    client
        .write(&envelope)
        .map_err(|err| CliError::new(FAILURE, format!("send failed: {err}")))?;

    if let Some(rx) = reply {
        let received = rx
            .recv_timeout(wait_timeout)
            .map_err(|_| CliError::new(TIMEOUT, "timed out waiting for reply"))?;
        let line = serde_json::to_string(&received)
            .unwrap_or_else(|_| "<unprintable envelope>".to_string());
        println!("{line}");
    }

    client.disconnect();
    Ok(SUCCESS)
}

fn parse_endpoint(endpoint: &str) -> CliResult<(String, u16)> {
    let Some((host, port)) = endpoint.rsplit_once(':') else {
        return Err(CliError::new(USAGE, format!("--tcp expects host:port, got {endpoint}")));
    };
    let port: u16 = port
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid port in {endpoint}")))?;
    Ok((host.to_string(), port))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(USAGE, format!("unsupported duration unit: {unit}"))),
    }
}
