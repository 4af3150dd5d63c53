use log::{info, warn};
use mqmeter_common::transport::Transport;

use crate::{
    config::{self, connection_properties, ExchangeConfig, Parameters},
    exchange::ExchangeRunner,
    outcome::{ExchangeOutcome, SampleResult},
};

/// One virtual user of a load test.
///
/// Connection properties are resolved once in [`Sampler::open`], every
/// [`Sampler::run_test`] is a full connect / exchange / disconnect cycle.
pub struct Sampler<T> {
    runner: ExchangeRunner<T>,
}

impl<T: Transport> Sampler<T> {
    /// parameter names and placeholder values offered to the harness
    pub fn default_parameters() -> Vec<(&'static str, &'static str)> {
        config::default_parameters()
    }

    pub fn open(transport: T, params: &Parameters) -> config::Result<Self> {
        let properties = connection_properties(params)?;
        info!(
            "MQ Manager properties are hostname: {} port: {} channel: {}",
            properties.host, properties.port, properties.channel
        );
        Ok(Self {
            runner: ExchangeRunner::new(transport, properties),
        })
    }

    pub async fn run_test(&self, params: &Parameters) -> SampleResult {
        let config = ExchangeConfig::from_parameters(params);
        let result = SampleResult::start(&config.message);
        let outcome = self.runner.execute(&config).await;
        if let ExchangeOutcome::Failure { message, .. } = &outcome {
            warn!("{message}");
        }
        result.finish(&outcome)
    }

    /// nothing is held between iterations
    pub fn close(self) {
        info!("sampler closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use mqmeter_common::transport::{memory::MemoryTransport, ConnectionProperties};

    use crate::{
        config::*,
        outcome::NO_RESPONSE_REQUIRED,
        responder::{Responder, ResponderOptions},
    };

    use super::*;

    fn params(reply_queue: &str) -> Parameters {
        [
            (PARAMETER_MQ_MANAGER, "QM1"),
            (PARAMETER_MQ_QUEUE_RQST, "DEV.QUEUE.1"),
            (PARAMETER_MQ_QUEUE_RSPS, reply_queue),
            (PARAMETER_MQ_CORRELATE_RSPS_MSG, "messageId"),
            (PARAMETER_MQ_WAIT_INTERVAL, "2000"),
            (PARAMETER_MQ_HOSTNAME, "localhost"),
            (PARAMETER_MQ_PORT, "1414"),
            (PARAMETER_MQ_CHANNEL, "DEV.APP.SVRCONN"),
            (PARAMETER_MQ_USER_ID, "app"),
            (PARAMETER_MQ_USER_PASSWORD, "passw0rd"),
            (PARAMETER_MQ_ENCODING_MESSAGE, "UTF-8"),
            (PARAMETER_MQ_MESSAGE, "ping"),
        ]
        .into_iter()
        .collect()
    }

    fn transport() -> MemoryTransport {
        MemoryTransport::builder("QM1")
            .queue("DEV.QUEUE.1")
            .queue("DEV.QUEUE.2")
            .credentials("app", "passw0rd")
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn run_test_reports_reply() {
        let transport = transport();
        let props = ConnectionProperties {
            user_id: Some("app".to_string()),
            password: Some("passw0rd".to_string()),
            ..Default::default()
        };
        let responder = Responder::start(
            &transport,
            &props,
            ResponderOptions::new("QM1", "DEV.QUEUE.1", "DEV.QUEUE.2")
                .delay(Duration::from_millis(50)),
            |_: &[u8]| Bytes::from_static(b"pong"),
        )
        .await
        .unwrap();

        let params = params("DEV.QUEUE.2");
        let sampler = Sampler::open(transport.clone(), &params).unwrap();
        for _ in 0..3 {
            let result = sampler.run_test(&params).await;
            assert!(result.successful, "{result:?}");
            assert_eq!(result.response_code, "OK");
            assert_eq!(result.response_data, "pong");
            assert_eq!(result.sampler_data, "ping");
            assert!(result.elapsed_ms >= 50);
        }
        sampler.close();

        assert_eq!(responder.stop().await, 3);
        assert_eq!(transport.connects(), 4);
        assert_eq!(transport.releases(), 4);
    }

    #[tokio::test]
    async fn run_test_without_reply_queue() {
        let transport = transport();
        let params = params("");
        let sampler = Sampler::open(transport.clone(), &params).unwrap();
        let result = sampler.run_test(&params).await;
        assert!(result.successful);
        assert_eq!(result.response_data, NO_RESPONSE_REQUIRED);
        assert_eq!(transport.depth("DEV.QUEUE.1"), Some(1));
    }

    #[tokio::test]
    async fn run_test_reports_failure() {
        let transport = transport();
        let mut params = params("");
        params.set(PARAMETER_MQ_USER_PASSWORD, "wrong");
        let sampler = Sampler::open(transport.clone(), &params).unwrap();
        let result = sampler.run_test(&params).await;
        assert!(!result.successful);
        assert_eq!(result.response_code, "500");
        assert!(result
            .response_message
            .ends_with("MQ Reason Code: MQRC_NOT_AUTHORIZED"));
        assert!(result.response_data.starts_with("connect failed"));
        assert_eq!(transport.connects(), 0);
    }

    #[test]
    fn open_rejects_placeholder_port() {
        let mut params = params("");
        params.set(PARAMETER_MQ_PORT, "${MQ_PORT}");
        let err = Sampler::open(transport(), &params).err().unwrap();
        assert!(matches!(err, Error::InvalidPort { .. }));
    }

    #[test]
    fn declares_default_parameters() {
        let names: Vec<_> = Sampler::<MemoryTransport>::default_parameters()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names.first(), Some(&PARAMETER_MQ_MANAGER));
        assert_eq!(names.last(), Some(&PARAMETER_MQ_MESSAGE));
    }
}
