use std::time::Duration;

use bytes::Bytes;
use flexi_logger::{colored_detailed_format, Logger};
use mqmeter_client::{
    common::transport::{memory::MemoryTransport, ConnectionProperties},
    config::*,
    responder::{ReplyMode, Responder, ResponderOptions},
    Sampler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // logger init
    Logger::try_with_str("debug")?
        .format(colored_detailed_format)
        .start()?;

    let transport = MemoryTransport::builder("QM1")
        .queue("DEV.QUEUE.1")
        .queue("DEV.QUEUE.2")
        .build();
    let responder = Responder::start(
        &transport,
        &ConnectionProperties::default(),
        ResponderOptions::new("QM1", "DEV.QUEUE.1", "DEV.QUEUE.2")
            .reply_mode(ReplyMode::CorrelationId)
            .delay(Duration::from_millis(20)),
        |request: &[u8]| Bytes::from(request.to_ascii_uppercase()),
    )
    .await?;

    let mut params: Parameters = Sampler::<MemoryTransport>::default_parameters()
        .into_iter()
        .collect();
    params
        .set(PARAMETER_MQ_MANAGER, "QM1")
        .set(PARAMETER_MQ_QUEUE_RQST, "DEV.QUEUE.1")
        .set(PARAMETER_MQ_QUEUE_RSPS, "DEV.QUEUE.2")
        .set(PARAMETER_MQ_CORRELATE_RSPS_MSG, "correlationId")
        .set(PARAMETER_MQ_WAIT_INTERVAL, "1000")
        .set(PARAMETER_MQ_HOSTNAME, "localhost")
        .set(PARAMETER_MQ_PORT, "1414")
        .set(PARAMETER_MQ_CHANNEL, "DEV.APP.SVRCONN")
        .set(PARAMETER_MQ_ENCODING_MESSAGE, "UTF-8")
        .set(PARAMETER_MQ_MESSAGE, "hello, world");

    let sampler = Sampler::open(transport, &params)?;
    for _ in 0..3 {
        let result = sampler.run_test(&params).await;
        println!("{}", serde_json::to_string(&result)?);
    }
    sampler.close();
    println!("responder sent {} replies", responder.stop().await);
    Ok(())
}
