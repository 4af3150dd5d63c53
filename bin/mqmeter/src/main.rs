use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use clap::Parser;
use flexi_logger::{detailed_format, Logger};
use futures::{future::join_all, StreamExt};
use log::{info, warn};
use mqmeter_client::{
    config::*,
    outcome::SampleResult,
    responder::{ReplyMode, Responder, ResponderOptions},
    Sampler,
};
use mqmeter_common::{helper::wait, transport::memory::MemoryTransport};
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Request/reply load test against an in-process queue manager.
///
/// The queue manager named by --manager is created inside this process with
/// the request and reply queues defined. --hostname, --port and --channel are
/// only validated, carried into the connection properties and logged; no
/// network connection is made. Queues hold at most 5000 messages, further
/// puts fail with MQRC_Q_FULL.
#[derive(clap::Parser)]
#[command(version)]
struct Args {
    #[arg(long, default_value = "QM1", env = "MQ_MANAGER")]
    manager: String,
    #[arg(long, default_value = "DEV.QUEUE.1", env = "MQ_QUEUE_RQST")]
    request_queue: String,
    /// leave empty to only publish
    #[arg(long, default_value = "", env = "MQ_QUEUE_RSPS")]
    reply_queue: String,
    /// messageId or correlationId
    #[arg(long, default_value = "", env = "MQ_CORRELATE_RSPS_MSG")]
    correlate: String,
    /// milliseconds to wait for the reply
    #[arg(long, default_value = "", env = "MQ_WAIT_INTERVAL")]
    wait_interval: String,
    /// logged only, the queue manager runs in process
    #[arg(long, default_value = "localhost", env = "MQ_HOSTNAME")]
    hostname: String,
    /// must be a valid port number, logged only
    #[arg(long, default_value = "1414", env = "MQ_PORT")]
    port: String,
    /// logged only
    #[arg(long, default_value = "DEV.APP.SVRCONN", env = "MQ_CHANNEL")]
    channel: String,
    #[arg(long, default_value = "", env = "MQ_USER_ID")]
    user_id: String,
    #[arg(long, default_value = "", env = "MQ_USER_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, default_value = "UTF-8", env = "MQ_ENCODING_MESSAGE")]
    encoding: String,
    #[arg(short, long, default_value = "hello", env = "MQ_MESSAGE")]
    message: String,
    /// virtual users
    #[arg(short, long, default_value_t = 1)]
    threads: usize,
    /// iterations per virtual user, 0 runs until stopped
    #[arg(short = 'n', long, default_value_t = 1)]
    loops: u64,
    #[arg(short, long, default_value = "info", env = "MQ_LOG_LEVEL")]
    log_level: String,
    /// write every sample result as a JSON line
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// answer requests from the request queue on the reply queue
    #[arg(long)]
    echo: bool,
    /// milliseconds the echo responder waits before replying
    #[arg(long, default_value_t = 0)]
    reply_delay: u64,
}

impl Args {
    fn parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        params
            .set(PARAMETER_MQ_MANAGER, &self.manager)
            .set(PARAMETER_MQ_QUEUE_RQST, &self.request_queue)
            .set(PARAMETER_MQ_QUEUE_RSPS, &self.reply_queue)
            .set(PARAMETER_MQ_CORRELATE_RSPS_MSG, &self.correlate)
            .set(PARAMETER_MQ_WAIT_INTERVAL, &self.wait_interval)
            .set(PARAMETER_MQ_HOSTNAME, &self.hostname)
            .set(PARAMETER_MQ_PORT, &self.port)
            .set(PARAMETER_MQ_CHANNEL, &self.channel)
            .set(PARAMETER_MQ_USER_ID, &self.user_id)
            .set(PARAMETER_MQ_USER_PASSWORD, &self.password)
            .set(PARAMETER_MQ_ENCODING_MESSAGE, &self.encoding)
            .set(PARAMETER_MQ_MESSAGE, &self.message);
        params
    }

    /// in-process queue manager holding the configured queues
    fn loopback(&self) -> MemoryTransport {
        // no access log, runs may be unbounded
        let mut builder = MemoryTransport::builder(&self.manager)
            .queue(&self.request_queue)
            .access_log(0);
        if !self.reply_queue.is_empty() {
            builder = builder.queue(&self.reply_queue);
        }
        if !self.user_id.is_empty() && !self.password.is_empty() {
            builder = builder.credentials(&self.user_id, &self.password);
        }
        builder.build()
    }
}

fn main() -> anyhow::Result<()> {
    // parse command line args
    let args = Args::parse();
    // logger init
    let _logger = Logger::try_with_str(&args.log_level)?
        .format(detailed_format)
        .start()?;

    let results = run(&args)?;
    if let Some(path) = &args.output {
        write_results(path, &results.samples)?;
    }
    println!("{results}");
    Ok(())
}

#[tokio::main]
async fn run(args: &Args) -> anyhow::Result<Summary> {
    let params = Arc::new(args.parameters());
    let transport = args.loopback();

    let responder = match (args.echo, args.reply_queue.is_empty()) {
        (false, _) => None,
        (true, true) => {
            warn!("no reply queue configured, echo responder not started");
            None
        }
        (true, false) => Some(start_responder(args, &transport, &params).await?),
    };

    let token = CancellationToken::new();
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;
    let handle = signals.handle();
    let stop = token.clone();
    let signal_task = tokio::spawn(async move {
        if signals.next().await.is_some() {
            info!("stop requested, finishing current iterations");
            stop.cancel();
        }
    });

    let started = Instant::now();
    let mut users = Vec::with_capacity(args.threads);
    for _ in 0..args.threads {
        let sampler = Sampler::open(transport.clone(), &params)?;
        users.push(tokio::spawn(virtual_user(
            sampler,
            params.clone(),
            args.loops,
            token.child_token(),
        )));
    }
    let samples = join_all(users.into_iter().enumerate().map(|(i, user)| async move {
        let label = format!("virtual user {i}");
        wait(user, &label).await.unwrap_or_default()
    }))
    .await
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();
    let wall = started.elapsed();

    handle.close();
    wait(signal_task, "signal").await;
    if let Some(responder) = responder {
        let served = responder.stop().await;
        info!("echo responder sent {served} replies");
    }
    Ok(Summary::new(samples, wall))
}

async fn start_responder(
    args: &Args,
    transport: &MemoryTransport,
    params: &Parameters,
) -> anyhow::Result<Responder> {
    let reply_mode = match CorrelationMode::parse(&args.correlate) {
        CorrelationMode::CorrelationId => ReplyMode::CorrelationId,
        _ => ReplyMode::MessageId,
    };
    let options = ResponderOptions::new(&args.manager, &args.request_queue, &args.reply_queue)
        .reply_mode(reply_mode)
        .delay(Duration::from_millis(args.reply_delay));
    let responder = Responder::start(
        transport,
        &connection_properties(params)?,
        options,
        |request: &[u8]| Bytes::copy_from_slice(request),
    )
    .await?;
    info!("echo responder started on {}", args.request_queue);
    Ok(responder)
}

async fn virtual_user(
    sampler: Sampler<MemoryTransport>,
    params: Arc<Parameters>,
    loops: u64,
    token: CancellationToken,
) -> Vec<SampleResult> {
    let mut samples = Vec::new();
    let mut iteration = 0;
    while (loops == 0 || iteration < loops) && !token.is_cancelled() {
        samples.push(sampler.run_test(&params).await);
        iteration += 1;
    }
    sampler.close();
    samples
}

fn write_results(path: &Path, samples: &[SampleResult]) -> anyhow::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for sample in samples {
        serde_json::to_writer(&mut out, sample)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

struct Summary {
    samples: Vec<SampleResult>,
    wall: Duration,
}

impl Summary {
    fn new(samples: Vec<SampleResult>, wall: Duration) -> Self {
        Self { samples, wall }
    }

    fn errors(&self) -> usize {
        self.samples.iter().filter(|s| !s.successful).count()
    }

    /// (min, avg, max) elapsed milliseconds
    fn elapsed_ms(&self) -> Option<(u128, u128, u128)> {
        let elapsed = self.samples.iter().map(|s| s.elapsed_ms);
        let min = elapsed.clone().min()?;
        let max = elapsed.clone().max()?;
        let avg = elapsed.sum::<u128>() / self.samples.len() as u128;
        Some((min, avg, max))
    }

    fn throughput(&self) -> f64 {
        let secs = self.wall.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.samples.len() as f64 / secs
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "samples: {}, errors: {}",
            self.samples.len(),
            self.errors()
        )?;
        if let Some((min, avg, max)) = self.elapsed_ms() {
            write!(f, ", elapsed ms min/avg/max: {min}/{avg}/{max}")?;
        }
        write!(f, ", throughput: {:.2}/s", self.throughput())
    }
}
