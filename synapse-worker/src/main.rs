mod config;
mod handler;

use std::time::Duration;

use config::{Backend, Config, parse_config};
use handler::{LoggingHandler, request_schema};
use log::{error, info, warn};
use synapse_broker::{
    BrokerError,
    adapters::rabbitmq::{AmqpChannel, RabbitMqSubscriber},
    in_memory::InMemoryAmqp,
};
use synapse_consumer::{AsyncMessageConsumer, ConsumerError, ObjectSchema, StopHandle};
use synapse_models::{AcknowledgeRequest, RuntimeError, SendableError};
use synapse_utilities::startup;
use tokio::task::JoinHandle;

type WorkerConsumer<C> =
    AsyncMessageConsumer<RabbitMqSubscriber<C>, LoggingHandler, ObjectSchema>;

/// Where consumer channels come from. Each subscription gets a channel of its own.
enum ChannelSource {
    InMemory(InMemoryAmqp),
    #[cfg(feature = "rabbitmq")]
    RabbitMq(lapin::Connection),
}

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    let config = parse_config()?;
    startup::startup("Synapse Worker", &config.logging)?;
    info!("Worker ID: {}", config.worker_id);

    let source = connect(&config).await?;
    let (stop_handles, tasks) = spawn_consumers(&source, &config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping worker...");
    for handle in &stop_handles {
        handle.stop();
    }

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Consumer terminated with error: {}", err),
            Err(err) if !err.is_cancelled() => error!("Consumer task join error: {}", err),
            Err(_) => {}
        }
    }

    close(source).await;
    Ok(())
}

async fn connect(config: &Config) -> Result<ChannelSource, SendableError> {
    match config.backend {
        Backend::InMemory => {
            let broker = InMemoryAmqp::new();
            for subscription in &config.subscriptions {
                broker.declare_queue(subscription);
            }
            warn!("Using the in-memory broker; messages do not leave this process");
            Ok(ChannelSource::InMemory(broker))
        }
        #[cfg(feature = "rabbitmq")]
        Backend::Rabbitmq => {
            info!("Connecting to RabbitMQ");
            let connection = synapse_broker::adapters::rabbitmq::LapinChannel::connect(
                &config.amqp_url,
            )
            .await
            .map_err(|err| broker_error("connect", err))?;
            Ok(ChannelSource::RabbitMq(connection))
        }
        #[cfg(not(feature = "rabbitmq"))]
        Backend::Rabbitmq => Err(Box::new(RuntimeError::new(
            "worker.broker.backend_not_ready",
            "Broker backend 'rabbitmq' requires building with the 'rabbitmq' feature",
        ))),
    }
}

async fn spawn_consumers(
    source: &ChannelSource,
    config: &Config,
) -> Result<(Vec<StopHandle>, Vec<JoinHandle<Result<(), SendableError>>>), SendableError> {
    let mut stop_handles = Vec::new();
    let mut tasks = Vec::new();

    for subscription in &config.subscriptions {
        let (stop_handle, task) = match source {
            ChannelSource::InMemory(broker) => {
                spawn_consumer(broker.open_channel(), subscription, config)
            }
            #[cfg(feature = "rabbitmq")]
            ChannelSource::RabbitMq(connection) => {
                let channel = synapse_broker::adapters::rabbitmq::LapinChannel::open(connection)
                    .await
                    .map_err(|err| broker_error("channel", err))?;
                spawn_consumer(channel, subscription, config)
            }
        };
        stop_handles.push(stop_handle);
        tasks.push(task);
    }

    Ok((stop_handles, tasks))
}

fn spawn_consumer<C>(
    channel: C,
    subscription: &str,
    config: &Config,
) -> (StopHandle, JoinHandle<Result<(), SendableError>>)
where
    C: AmqpChannel,
{
    let consumer = AsyncMessageConsumer::new(
        subscription,
        LoggingHandler::new(config.worker_id, subscription),
        request_schema(),
        RabbitMqSubscriber::new(channel),
    )
    .with_pull_timeout(config.pull_timeout);
    let stop_handle = consumer.stop_handle();

    info!("Consuming from {}", subscription);
    let task = tokio::spawn(async move { supervise(consumer).await });
    (stop_handle, task)
}

/// Runs a consumer until it is stopped. Messages that fail to decode, validate or
/// handle are rejected without requeue; transport failures end the consumer.
async fn supervise<C>(consumer: WorkerConsumer<C>) -> Result<(), SendableError>
where
    C: AmqpChannel,
{
    consumer.start();
    loop {
        match consumer.run().await {
            Ok(()) => return Ok(()),
            Err(ConsumerError::Transport(err)) => return Err(broker_error("pull", err)),
            Err(err) => {
                error!("Error processing message: {}", err);
                if let Some(ack_id) = err.ack_id() {
                    let request = AcknowledgeRequest::new(consumer.subscription(), [ack_id]);
                    consumer
                        .subscriber()
                        .nack(&request, false)
                        .await
                        .map_err(|err| broker_error("nack", err))?;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn close(source: ChannelSource) {
    match source {
        ChannelSource::InMemory(broker) => {
            drop(broker);
        }
        #[cfg(feature = "rabbitmq")]
        ChannelSource::RabbitMq(connection) => {
            if let Err(err) = connection.close(200, "worker shutdown").await {
                warn!("Failed to close RabbitMQ connection: {}", err);
            }
        }
    }
}

fn broker_error(context: &'static str, err: BrokerError) -> SendableError {
    Box::new(RuntimeError::new(
        format!("worker.broker.{context}"),
        err.to_string(),
    ))
}
