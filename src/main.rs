use anyhow::{Context, Result, anyhow};
use clap::{ArgGroup, Parser};
use reqkit::{Attachment, Dispatcher, Method, RequestSpec, Response};
use serde_json::Value;
use std::io::Write;
use std::path::Path;

/// reqkit - send one HTTP request
///
/// Any HTTP status is printed and exits successfully; only a transport
/// failure (after retries) exits with an error.
///
/// Examples:
///   reqkit get https://api.example.com/users -d page=2
///   reqkit post /users --base-url https://api.example.com --json -d name=Ada -d age:=36
///   reqkit post /upload --base-url https://api.example.com -F avatar=@me.png -F note=hi
#[derive(Parser, Debug)]
#[command(author, version = env!("REQKIT_VERSION"), about)]
#[command(group(ArgGroup::new("format").args(["json", "form", "multipart"])))]
struct Cli {
    /// HTTP method: HEAD, GET, POST, PUT, PATCH or DELETE
    #[arg(value_name = "METHOD")]
    method: Method,

    /// Endpoint path, resolved against --base-url, or an absolute URL
    #[arg(value_name = "ENDPOINT")]
    endpoint: Option<String>,

    /// Base URL the endpoint is resolved against
    #[arg(long, env = "REQKIT_BASE_URL", value_name = "URL")]
    base_url: Option<String>,

    /// Extra header, as 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Data field, as key=value, or key:=json for a raw JSON value (repeatable)
    #[arg(short = 'd', long = "data", value_name = "FIELD")]
    data: Vec<String>,

    /// Send data as a JSON body
    #[arg(long)]
    json: bool,

    /// Send data url-encoded (the default for bodies)
    #[arg(long)]
    form: bool,

    /// Send data as multipart/form-data
    #[arg(long)]
    multipart: bool,

    /// Multipart entry, as name=@path for a file or name=text (repeatable)
    #[arg(short = 'F', long = "attach", value_name = "ENTRY")]
    attachments: Vec<String>,

    /// Authorization token
    #[arg(long, env = "REQKIT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Authorization scheme placed before the token
    #[arg(long, default_value = "Bearer")]
    token_type: String,

    /// Accept header
    #[arg(long)]
    accept: Option<String>,

    /// User-Agent header
    #[arg(long)]
    user_agent: Option<String>,

    /// Request timeout in seconds (0 disables)
    #[arg(long, default_value_t = 5.0, value_name = "SECONDS")]
    timeout: f64,

    /// Connect timeout in seconds (0 disables)
    #[arg(long, default_value_t = 2.0, value_name = "SECONDS")]
    connect_timeout: f64,

    /// Proxy URL
    #[arg(long, env = "REQKIT_PROXY", value_name = "URL")]
    proxy: Option<String>,

    /// Retries after a transport failure
    #[arg(long, default_value_t = 0, value_name = "N")]
    retry: u32,

    /// Base backoff delay in microseconds, doubled on every retry
    #[arg(long = "retry-delay-us", default_value_t = 100_000, value_name = "MICROS")]
    retry_delay_us: u64,

    /// Print the status line and response headers before the body
    #[arg(short = 'i', long)]
    include: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let method = cli.method;
    let include = cli.include;
    let spec = build_spec(cli)?;

    let response = spec
        .send(method, &Dispatcher::new())
        .await
        .context("Request failed")?;

    print_response(&response, include)
}

fn build_spec(cli: Cli) -> Result<RequestSpec> {
    let mut spec = RequestSpec::new()
        .timeout(cli.timeout)
        .connect_timeout(cli.connect_timeout)
        .retry(cli.retry, cli.retry_delay_us)
        .user_agent(
            cli.user_agent
                .unwrap_or_else(|| format!("reqkit/{}", env!("REQKIT_VERSION"))),
        );

    if let Some(base_url) = &cli.base_url {
        spec = spec.set_base_url(base_url);
    }
    if let Some(endpoint) = &cli.endpoint {
        spec = spec.endpoint(endpoint);
    }
    if let Some(proxy) = cli.proxy {
        spec = spec.set_proxy(proxy);
    }
    if let Some(accept) = cli.accept {
        spec = spec.accept(accept);
    }
    if let Some(token) = &cli.token {
        spec = spec.with_token_type(token, &cli.token_type);
    }

    let headers = cli
        .headers
        .iter()
        .map(|h| parse_header(h))
        .collect::<Result<Vec<_>>>()?;
    spec = spec.headers(headers);

    if !cli.data.is_empty() {
        let data = cli
            .data
            .iter()
            .map(|d| parse_data(d))
            .collect::<Result<Vec<_>>>()?;
        spec = spec.data(data);
    }

    if cli.json {
        spec = spec.as_json();
    } else if cli.form {
        spec = spec.as_form();
    } else if cli.multipart {
        spec = spec.as_multipart();
    }

    for entry in &cli.attachments {
        spec = spec.attach(parse_attachment(entry)?);
    }

    Ok(spec)
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid header {:?}, expected 'Name: value'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("Invalid header {:?}, name is empty", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_data(raw: &str) -> Result<(String, Value)> {
    if let Some((key, json)) = raw.split_once(":=") {
        let value = serde_json::from_str(json)
            .with_context(|| format!("Invalid JSON value for data field {:?}", key))?;
        return Ok((key.to_string(), value));
    }

    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid data field {:?}, expected key=value", raw))?;
    Ok((key.to_string(), Value::String(value.to_string())))
}

fn parse_attachment(raw: &str) -> Result<Attachment> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid attachment {:?}, expected name=@path or name=text", raw))?;

    let Some(path) = value.strip_prefix('@') else {
        return Ok(Attachment::new(name, value.to_string()));
    };

    let path = Path::new(path);
    let contents =
        std::fs::read(path).with_context(|| format!("Failed to read attachment {:?}", path))?;
    let attachment = Attachment::new(name, contents);

    Ok(match path.file_name() {
        Some(filename) => attachment.filename(filename.to_string_lossy()),
        None => attachment,
    })
}

fn print_response(response: &Response, include: bool) -> Result<()> {
    let mut stdout = std::io::stdout().lock();

    if include {
        writeln!(stdout, "HTTP {}", response.status())?;
        for (name, value) in response.headers() {
            writeln!(stdout, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(stdout)?;
    }

    stdout
        .write_all(response.bytes())
        .context("Failed to write response body")?;
    stdout.flush()?;
    Ok(())
}
