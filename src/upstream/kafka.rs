//! Kafka implementation of the upstream log adapter.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::base_consumer::BaseConsumer;
use rdkafka::consumer::Consumer;
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};

use crate::errors::{Error, Result};
use crate::upstream::{LogRecord, LogSource};

const POLL_TIMEOUT: Duration = Duration::from_millis(250);
/// Consecutive empty polls tolerated before the upstream is declared
/// unreachable mid-read.
const MAX_EMPTY_POLLS: u32 = 40;

pub struct KafkaLogSource {
    consumer: BaseConsumer,
    topic: String,
    metadata_timeout: Duration,
}

impl KafkaLogSource {
    pub fn new(brokers: &[String], topic: &str, client_group: &str) -> Result<Self> {
        // No consumer groups: partition assignment is always manual here,
        // but librdkafka requires a group id to be set anyway.
        let consumer: BaseConsumer = ClientConfig::new()
            .set("group.id", client_group)
            .set("enable.auto.commit", "false")
            .set("bootstrap.servers", brokers.join(","))
            .set("enable.partition.eof", "true")
            .create()
            .map_err(|err| Error::UpstreamUnavailable(format!("building consumer: {err}")))?;

        Ok(Self {
            consumer,
            topic: topic.to_string(),
            metadata_timeout: Duration::from_secs(10),
        })
    }

    fn watermarks(&self, partition: i32) -> Result<(i64, i64)> {
        self.consumer
            .fetch_watermarks(&self.topic, partition, self.metadata_timeout)
            .map_err(|err| {
                Error::UpstreamUnavailable(format!(
                    "fetching watermarks for {}/{partition}: {err}",
                    self.topic
                ))
            })
    }
}

impl LogSource for KafkaLogSource {
    fn earliest_offset(&self, partition: i32) -> Result<i64> {
        Ok(self.watermarks(partition)?.0)
    }

    fn latest_offset(&self, partition: i32) -> Result<i64> {
        let (low, high) = self.watermarks(partition)?;
        // The high watermark is the next offset to be produced.
        if high <= low {
            return Err(Error::UpstreamUnavailable(format!(
                "{}/{partition} has no retained records",
                self.topic
            )));
        }
        Ok(high - 1)
    }

    fn consume(&self, partition: i32, start: i64, end: i64) -> Result<Vec<LogRecord>> {
        let mut partitions = TopicPartitionList::new();
        partitions
            .add_partition_offset(&self.topic, partition, Offset::Offset(start))
            .map_err(|err| Error::UpstreamUnavailable(format!("assigning {partition}: {err}")))?;
        self.consumer
            .assign(&partitions)
            .map_err(|err| Error::UpstreamUnavailable(format!("assigning {partition}: {err}")))?;

        let mut records = Vec::new();
        let mut empty_polls = 0;
        loop {
            match self.consumer.poll(POLL_TIMEOUT) {
                None => {
                    empty_polls += 1;
                    if empty_polls > MAX_EMPTY_POLLS {
                        return Err(Error::UpstreamUnavailable(format!(
                            "no records from {}/{partition} after {empty_polls} polls",
                            self.topic
                        )));
                    }
                }
                Some(Err(KafkaError::PartitionEOF(_))) => break,
                Some(Err(err)) => {
                    return Err(Error::UpstreamUnavailable(format!(
                        "reading {}/{partition}: {err}",
                        self.topic
                    )));
                }
                Some(Ok(msg)) => {
                    empty_polls = 0;
                    if msg.offset() > end {
                        break;
                    }
                    records.push(LogRecord {
                        offset: msg.offset(),
                        payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
                    });
                    if msg.offset() >= end {
                        break;
                    }
                }
            }
        }
        Ok(records)
    }
}
