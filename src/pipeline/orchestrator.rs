//! Starts the stage loops, runs collection and waits for the loops to drain

use super::report::{BlockedConsumer, PipelineReport, StageOutcome};
use super::PipelineError;
use crate::assembler::Assembler;
use crate::bus::{topic, CancellationToken, MessageBus, SqliteBus};
use crate::collector::{BusDocumentSink, CollectorRegistry, FileCollector};
use crate::config::PipelineOptions;
use crate::ingestor::{ArtifactParser, IngestorStage};
use crate::processor::{BundleTreeBuilder, BusTreeSink, ProcessorStage};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Durable consumer name of the processor stage
pub const PROCESSOR_CONSUMER: &str = "processor";
/// Durable consumer name of the ingestor stage
pub const INGESTOR_CONSUMER: &str = "ingestor";

/// The wired pipeline.
///
/// Both stage loops are subscribed and spawned before collection starts.
/// After collection the processor is told to drain, then the ingestor;
/// in follow mode both keep running until the shutdown token fires.
pub struct Pipeline {
    bus: Arc<dyn MessageBus>,
    collectors: CollectorRegistry,
    processor: Arc<ProcessorStage>,
    ingestor: Arc<IngestorStage>,
    follow: bool,
    shutdown: CancellationToken,
}

impl Pipeline {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        collectors: CollectorRegistry,
        processor: ProcessorStage,
        ingestor: IngestorStage,
    ) -> Self {
        Self {
            bus,
            collectors,
            processor: Arc::new(processor),
            ingestor: Arc::new(ingestor),
            follow: false,
            shutdown: CancellationToken::new(),
        }
    }

    /// Keep the stage loops alive after collection until [`Self::shutdown_token`]
    /// is cancelled.
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    /// Token that ends a follow-mode run.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wire the production pipeline: SQLite bus, file collector, bundle
    /// tree builder, artifact parser and the SQLite graph assembler.
    ///
    /// Every step here is fatal on failure.
    pub async fn from_options(options: &PipelineOptions) -> Result<Self, PipelineError> {
        let bus = SqliteBus::connect(&options.bus_path).await?;
        if options.recreate_stream {
            warn!(bus = %options.bus_path.display(), "Recreating stream; queued messages are dropped");
            bus.recreate().await?;
        }

        let assembler = Assembler::new(&options.database)?;

        let mut collectors = CollectorRegistry::new();
        if let Err(e) = collectors.register(Arc::new(FileCollector::new(&options.source_path))) {
            error!(error = %e, "Unable to register file collector");
        }

        let bus: Arc<dyn MessageBus> = Arc::new(bus);
        let processor = ProcessorStage::new(
            Arc::new(BundleTreeBuilder::new()),
            Arc::new(BusTreeSink::new(bus.clone())),
        );
        let parser = ArtifactParser::new()
            .with_verifier_key_id(options.verifier_key_id().map(str::to_string));
        let ingestor = IngestorStage::new(Arc::new(parser), Arc::new(assembler));

        Ok(Self::new(bus, collectors, processor, ingestor).follow(options.follow))
    }

    /// Run one collection pass through the pipeline.
    ///
    /// Returns `Err` only for fatal conditions: a failed subscription or a
    /// collected document that could not be published. Stage loop failures
    /// are logged and reported in the [`PipelineReport`].
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let run_id = Uuid::new_v4();
        self.run_inner(run_id)
            .instrument(info_span!("pipeline", run_id = %run_id))
            .await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<PipelineReport, PipelineError> {
        info!(follow = self.follow, "Starting pipeline");

        let raw_mark = self.bus.high_water_mark(topic::DOCUMENT_INGESTION).await?;
        let processed_mark = self.bus.high_water_mark(topic::DOCUMENT_PROCESSED).await?;

        let processor_cancel = CancellationToken::new();
        let ingestor_cancel = CancellationToken::new();

        let raw = self
            .bus
            .subscribe(topic::DOCUMENT_INGESTION, PROCESSOR_CONSUMER, processor_cancel.clone())
            .await?;
        let processed = self
            .bus
            .subscribe(topic::DOCUMENT_PROCESSED, INGESTOR_CONSUMER, ingestor_cancel.clone())
            .await?;

        let processor = self.processor.clone();
        let processor_handle =
            tokio::spawn(async move { processor.run(raw).await }.in_current_span());
        let ingestor = self.ingestor.clone();
        let ingestor_handle =
            tokio::spawn(async move { ingestor.run(processed).await }.in_current_span());

        let sink = BusDocumentSink::new(self.bus.clone());
        let summary = match self.collectors.collect(&sink).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Collection aborted; draining stages");
                processor_cancel.cancel();
                StageOutcome::from_join("processor", processor_handle.await);
                ingestor_cancel.cancel();
                StageOutcome::from_join("ingestor", ingestor_handle.await);
                return Err(e.into());
            }
        };
        info!(
            documents = summary.emitted,
            graceful = summary.outcome.is_graceful(),
            "Collection finished"
        );

        if self.follow {
            info!("Following topics until shutdown");
            self.shutdown.cancelled().await;
            info!("Shutdown requested");
        }

        processor_cancel.cancel();
        let processor = StageOutcome::from_join("processor", processor_handle.await);
        ingestor_cancel.cancel();
        let ingestor = StageOutcome::from_join("ingestor", ingestor_handle.await);

        let mut blocked = Vec::new();
        if !processor.is_completed() {
            blocked.extend(
                self.blocked_consumer("processor", topic::DOCUMENT_INGESTION, PROCESSOR_CONSUMER, raw_mark)
                    .await,
            );
        }
        if !ingestor.is_completed() {
            blocked.extend(
                self.blocked_consumer("ingestor", topic::DOCUMENT_PROCESSED, INGESTOR_CONSUMER, processed_mark)
                    .await,
            );
        }

        let report = PipelineReport {
            run_id,
            collection: summary.outcome,
            documents_published: summary.emitted,
            processor,
            ingestor,
            blocked,
        };
        info!(clean = report.is_clean(), "Pipeline drained");
        Ok(report)
    }

    /// Whether a failed stage stopped on a message published before this
    /// run (sequence at or below `mark`).
    async fn blocked_consumer(
        &self,
        stage: &'static str,
        topic: &str,
        consumer: &str,
        mark: i64,
    ) -> Option<BlockedConsumer> {
        let sequence = match self.bus.next_pending(topic, consumer).await {
            Ok(Some(sequence)) if sequence <= mark => sequence,
            Ok(_) => return None,
            Err(e) => {
                warn!(stage = stage, error = %e, "Unable to read consumer position");
                return None;
            }
        };
        error!(
            stage = stage,
            topic = %topic,
            consumer = %consumer,
            sequence = sequence,
            "Consumer blocked by a message from an earlier run; \
             it is redelivered first on every run. Rerun with --recreate-stream to discard it"
        );
        Some(BlockedConsumer {
            stage,
            topic: topic.to_string(),
            consumer: consumer.to_string(),
            sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusResult, Subscription};
    use crate::collector::{CollectError, DocumentCollector, DocumentSink};
    use crate::document::{Document, FormatHint};
    use crate::graph::Graph;
    use crate::ingestor::GraphSink;
    use crate::storage::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct StaticCollector {
        documents: Vec<Document>,
    }

    #[async_trait]
    impl DocumentCollector for StaticCollector {
        fn name(&self) -> &str {
            "StaticCollector"
        }

        async fn collect(&self, sink: &dyn DocumentSink) -> Result<(), CollectError> {
            for document in &self.documents {
                sink.emit(document.clone()).await?;
            }
            Ok(())
        }
    }

    fn osv(id: &str) -> Document {
        Document::new(
            format!(r#"{{"id":"{id}","affected":[{{"package":{{"purl":"pkg:npm/{id}@1.0.0"}}}}]}}"#)
                .into_bytes(),
            FormatHint::Json,
            "static",
            format!("{id}.json"),
        )
    }

    /// Records store batches, sleeping before each.
    #[derive(Default)]
    struct SlowGraphSink {
        delay: Duration,
        batches: Mutex<Vec<Graph>>,
    }

    #[async_trait]
    impl GraphSink for SlowGraphSink {
        async fn store(&self, fragments: Vec<Graph>) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.batches.lock().unwrap().push(Graph::merge(fragments));
            Ok(())
        }
    }

    /// Bus whose publish on the raw topic fails from the `fail_at`-th call.
    struct FlakyBus {
        inner: SqliteBus,
        fail_at: usize,
        offered: AtomicUsize,
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        async fn initialize(&self) -> BusResult<()> {
            self.inner.initialize().await
        }

        async fn recreate(&self) -> BusResult<()> {
            self.inner.recreate().await
        }

        async fn publish(&self, topic: &str, payload: &[u8]) -> BusResult<()> {
            if topic == topic::DOCUMENT_INGESTION {
                let n = self.offered.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= self.fail_at {
                    return Err(crate::bus::BusError::Closed);
                }
            }
            self.inner.publish(topic, payload).await
        }

        async fn subscribe(
            &self,
            topic: &str,
            consumer: &str,
            cancel: CancellationToken,
        ) -> BusResult<Box<dyn Subscription>> {
            self.inner.subscribe(topic, consumer, cancel).await
        }

        async fn high_water_mark(&self, topic: &str) -> BusResult<i64> {
            self.inner.high_water_mark(topic).await
        }

        async fn next_pending(&self, topic: &str, consumer: &str) -> BusResult<Option<i64>> {
            self.inner.next_pending(topic, consumer).await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }

    async fn memory_bus() -> SqliteBus {
        let bus = SqliteBus::open_in_memory().unwrap();
        bus.initialize().await.unwrap();
        bus
    }

    fn pipeline(bus: Arc<dyn MessageBus>, documents: Vec<Document>, sink: Arc<dyn GraphSink>) -> Pipeline {
        let mut collectors = CollectorRegistry::new();
        collectors
            .register(Arc::new(StaticCollector { documents }))
            .unwrap();
        Pipeline::new(
            bus.clone(),
            collectors,
            ProcessorStage::new(Arc::new(BundleTreeBuilder::new()), Arc::new(BusTreeSink::new(bus))),
            IngestorStage::new(Arc::new(ArtifactParser::new()), sink),
        )
    }

    #[tokio::test]
    async fn completion_waits_for_a_slow_ingestor() {
        let bus = memory_bus().await;
        let sink = Arc::new(SlowGraphSink {
            delay: Duration::from_millis(150),
            ..Default::default()
        });
        let docs = vec![osv("GHSA-1"), osv("GHSA-2"), osv("GHSA-3")];

        let started = Instant::now();
        let report = pipeline(Arc::new(bus.clone()), docs, sink.clone())
            .run()
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(450));
        assert!(report.is_clean());
        assert_eq!(report.documents_published, 3);
        assert_eq!(report.processor, StageOutcome::Completed { handled: 3 });
        assert_eq!(report.ingestor, StageOutcome::Completed { handled: 3 });
        assert_eq!(sink.batches.lock().unwrap().len(), 3);
        assert_eq!(bus.message_count(topic::DOCUMENT_PROCESSED).unwrap(), 3);
    }

    #[tokio::test]
    async fn publish_failure_aborts_collection() {
        let inner = memory_bus().await;
        let bus = Arc::new(FlakyBus {
            inner: inner.clone(),
            fail_at: 2,
            offered: AtomicUsize::new(0),
        });
        let docs = vec![osv("GHSA-1"), osv("GHSA-2"), osv("GHSA-3")];

        let err = pipeline(bus.clone(), docs, Arc::new(SlowGraphSink::default()))
            .run()
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(err, PipelineError::Intake(_)));
        assert_eq!(bus.offered.load(Ordering::SeqCst), 2);
        assert_eq!(inner.message_count(topic::DOCUMENT_INGESTION).unwrap(), 1);
    }

    #[tokio::test]
    async fn stage_failure_is_reported_not_raised() {
        let bus = memory_bus().await;
        let docs = vec![
            Document::new(b"{ not json".to_vec(), FormatHint::Json, "static", "bad.json"),
            osv("GHSA-1"),
        ];

        let report = pipeline(Arc::new(bus), docs, Arc::new(SlowGraphSink::default()))
            .run()
            .await
            .unwrap();

        assert_eq!(report.documents_published, 2);
        assert!(matches!(report.processor, StageOutcome::Failed(_)));
        assert_eq!(report.ingestor, StageOutcome::Completed { handled: 0 });
        assert_eq!(report.stage_failures().count(), 1);
        assert!(!report.is_blocked());
    }

    #[tokio::test]
    async fn intake_abort_waits_for_stages() {
        let inner = memory_bus().await;
        let bus = Arc::new(FlakyBus {
            inner: inner.clone(),
            fail_at: 2,
            offered: AtomicUsize::new(0),
        });
        let sink = Arc::new(SlowGraphSink {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let docs = vec![osv("GHSA-1"), osv("GHSA-2")];

        pipeline(bus, docs, sink.clone()).run().await.unwrap_err();

        // the one published document was stored before run returned
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        assert_eq!(
            inner.next_pending(topic::DOCUMENT_PROCESSED, INGESTOR_CONSUMER).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn follow_mode_runs_until_shutdown() {
        let bus = memory_bus().await;
        let sink = Arc::new(SlowGraphSink::default());
        let pipeline = pipeline(Arc::new(bus.clone()), vec![osv("GHSA-1")], sink.clone()).follow(true);
        let shutdown = pipeline.shutdown_token();

        let run = tokio::spawn(async move { pipeline.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!run.is_finished());

        // a late document still reaches the graph sink
        bus.publish(topic::DOCUMENT_INGESTION, &osv("GHSA-2").to_payload().unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown.cancel();
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.ingestor, StageOutcome::Completed { handled: 2 });
        assert_eq!(sink.batches.lock().unwrap().len(), 2);
    }
}
