use crate::{
    cache::ShuffleCache,
    code_group::CodeGroupManager,
    nnet::Nnet,
    source::{
        CodeStore, FeatureSource, FixedTransform, FrozenBackend, LabelSource, LossFunction,
        ModelSink,
    },
    CodeatError, Result,
};
use codeat_structs::{
    config::TrainConfig,
    report::{GroupSummary, TrainReport},
};
use ndarray::Array2;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// 100 frames per second of audio, in hours.
const FRAMES_PER_HOUR: f64 = 360000.0;
const PROGRESS_INTERVAL: u64 = 1000;

/// Read side of a run.
pub struct Collaborators<'a> {
    pub features: &'a mut dyn FeatureSource,
    pub labels: &'a mut dyn LabelSource,
    pub codes: &'a dyn CodeStore,
    pub transform: &'a mut dyn FixedTransform,
    pub backend: &'a mut dyn FrozenBackend,
    pub loss: &'a mut dyn LossFunction,
}

/// Write side of a run; a destination is required for every enabled update.
#[derive(Default)]
pub struct Outputs<'a> {
    pub codes: Option<&'a mut dyn CodeStore>,
    pub model: Option<&'a mut dyn ModelSink>,
}

/// Matrices reused by every bunch. Each stage overwrites its output buffer in
/// full before the next stage reads it.
#[derive(Default)]
pub struct Buffers {
    feats_transf: Array2<f32>,
    nnet_in: Array2<f32>,
    targets: Vec<usize>,
    nnet_out: Array2<f32>,
    back_out: Array2<f32>,
    obj_diff: Array2<f32>,
    back_diff: Array2<f32>,
    in_diff: Array2<f32>,
}

/// Checks, before anything is read, that the requested run can complete.
pub fn validate_config(config: &TrainConfig, outputs: &Outputs) -> Result<()> {
    if config.bunch_size == 0 {
        return Err(CodeatError::InvalidConfig(
            "bunch size must be positive".to_string(),
        ));
    }
    if config.effective_cache_size() == 0 {
        return Err(CodeatError::InvalidConfig(format!(
            "cache size {} is smaller than the bunch size {}",
            config.cache_size, config.bunch_size
        )));
    }
    if config.cross_validate {
        return Ok(());
    }
    if !config.updates.any() {
        return Err(CodeatError::NoUpdatesEnabled);
    }
    if config.persists_network() && outputs.model.is_none() {
        return Err(CodeatError::MissingDestination {
            update: "weight/transform",
            destination: "adaptation network",
        });
    }
    if config.persists_codes() && outputs.codes.is_none() {
        return Err(CodeatError::MissingDestination {
            update: "code vector",
            destination: "code archive",
        });
    }
    Ok(())
}

pub struct TrainingLoop {
    config: TrainConfig,
    nnet: Nnet,
    manager: CodeGroupManager,
    cache: ShuffleCache,
    rng: StdRng,
    buffers: Buffers,
    report: TrainReport,
    started: Instant,
}

impl TrainingLoop {
    /// Takes ownership of the adaptation network, applies the training
    /// options and update flags to it and indexes its adaptive layers.
    pub fn new(config: TrainConfig, mut nnet: Nnet) -> Result<Self> {
        let manager = CodeGroupManager::new(&nnet)?;
        let cache = ShuffleCache::new(config.cache_size, config.bunch_size)?;
        nnet.set_train_options(config.train_options);
        nnet.configure_updates(config.updates);
        info!(
            "Totally {} among {} layers of the nnet are <codeat> layers.",
            manager.num_layers(),
            nnet.num_components()
        );
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            report: TrainReport {
                cross_validate: config.cross_validate,
                ..Default::default()
            },
            config,
            nnet,
            manager,
            cache,
            buffers: Buffers::default(),
            started: Instant::now(),
        })
    }

    pub fn nnet(&self) -> &Nnet {
        &self.nnet
    }

    pub fn into_nnet(self) -> Nnet {
        self.nnet
    }

    pub fn cache(&self) -> &ShuffleCache {
        &self.cache
    }

    /// Processes every group of `groups` in order, then writes the network
    /// once if weight or transform updates are enabled.
    pub fn run<G>(
        &mut self,
        groups: G,
        io: &mut Collaborators,
        outputs: &mut Outputs,
    ) -> Result<TrainReport>
    where
        G: IntoIterator<Item = anyhow::Result<(String, Vec<String>)>>,
    {
        validate_config(&self.config, outputs)?;
        self.started = Instant::now();
        info!("{} STARTED", self.report.mode());

        for group in groups {
            let (key, utts) = group?;
            self.process_group(&key, utts, io, outputs)?;
        }

        if self.config.persists_network() {
            if let Some(model) = outputs.model.as_mut() {
                model.write(&self.nnet)?;
                self.report.network_persisted = true;
            }
        }

        self.report.loss = io.loss.report();
        self.report.elapsed_secs = self.started.elapsed().as_secs_f64();
        self.log_summary();
        Ok(self.report.clone())
    }

    fn process_group(
        &mut self,
        key: &str,
        mut utts: Vec<String>,
        io: &mut Collaborators,
        outputs: &mut Outputs,
    ) -> Result<()> {
        self.report.groups += 1;
        info!("Set # {} - {}:", self.report.groups, key);
        self.manager.begin_group(key, &mut self.nnet, io.codes)?;
        self.cache.clear();
        if self.config.shuffle {
            utts.shuffle(&mut self.rng);
        }

        let mut summary = GroupSummary {
            key: key.to_string(),
            ..Default::default()
        };
        let mut queue = utts.into_iter();
        loop {
            self.cache.refill();
            while !self.cache.is_full() {
                let Some(utt) = queue.next() else {
                    break;
                };
                self.add_utterance(&utt, io, &mut summary)?;
            }
            // the fill only stops short of full once the list is exhausted
            if self.cache.is_empty() {
                break;
            }
            if !self.config.cross_validate && self.config.randomize {
                self.cache.randomize(&mut self.rng);
            }
            self.report.caches += 1;
            debug!(
                "Cache #{} {} segments: {} frames: {:.3}h",
                self.report.caches,
                if self.cache.is_randomized() {
                    "[RND]"
                } else {
                    "[NO-RND]"
                },
                self.report.utterances,
                self.report.total_frames as f64 / FRAMES_PER_HOUR
            );
            while !self.cache.is_empty() {
                let frames = self
                    .cache
                    .take_bunch(&mut self.buffers.nnet_in, &mut self.buffers.targets)?;
                self.train_bunch(io, &mut summary)?;
                summary.frames += frames as u64;
                summary.bunches += 1;
                self.report.total_frames += frames as u64;
            }
        }

        let persist = self.config.persists_codes();
        if persist && summary.frames == 0 {
            warn!("Set {} has no usable utterances, its code is not written", key);
        }
        let store = if persist && summary.frames > 0 {
            outputs.codes.as_deref_mut()
        } else {
            None
        };
        summary.persisted =
            self.manager
                .end_group(key, &self.nnet, store, self.config.allow_code_overwrite)?;
        self.report.group_summaries.push(summary);
        Ok(())
    }

    fn add_utterance(
        &mut self,
        utt: &str,
        io: &mut Collaborators,
        summary: &mut GroupSummary,
    ) -> Result<()> {
        trace!("Reading utt {}", utt);
        if !io.labels.has_key(utt) {
            debug!("Utterance {}: no alignment, skipped", utt);
            self.report.skipped.missing_alignment += 1;
            return Ok(());
        }
        let fetched = Instant::now();
        let features = io.features.get(utt)?;
        let alignment = io.labels.get(utt)?;
        self.report.feature_wait_secs += fetched.elapsed().as_secs_f64();

        if features.nrows() > self.config.max_frames {
            debug!(
                "Utterance {}: skipped because it has {} frames, which is more than {}",
                utt,
                features.nrows(),
                self.config.max_frames
            );
            self.report.skipped.too_long += 1;
            return Ok(());
        }
        if alignment.len() != features.nrows() {
            debug!(
                "Alignment has wrong size {} vs. features' {}, for utt {}",
                alignment.len(),
                features.nrows(),
                utt
            );
            self.report.skipped.length_mismatch += 1;
            return Ok(());
        }
        if features.nrows() == 0 {
            debug!("Utterance {}: no frames, nothing to cache", utt);
            return Ok(());
        }

        io.transform
            .forward(features.view(), &mut self.buffers.feats_transf)?;
        self.cache
            .add_utterance(self.buffers.feats_transf.view(), &alignment)?;
        self.report.utterances += 1;
        summary.utterances += 1;

        if self.report.utterances % PROGRESS_INTERVAL == 0 {
            let elapsed = self.started.elapsed().as_secs_f64();
            info!(
                "After {} utterances: time elapsed = {:.2} min; processed {:.1} frames per second.",
                self.report.utterances,
                elapsed / 60.0,
                if elapsed > 0.0 {
                    self.report.total_frames as f64 / elapsed
                } else {
                    0.0
                }
            );
        }
        Ok(())
    }

    fn train_bunch(&mut self, io: &mut Collaborators, summary: &mut GroupSummary) -> Result<()> {
        let buffers = &mut self.buffers;
        self.nnet
            .propagate(buffers.nnet_in.view(), &mut buffers.nnet_out)?;
        io.backend
            .forward(buffers.nnet_out.view(), &mut buffers.back_out)?;
        io.loss.evaluate(
            buffers.back_out.view(),
            &buffers.targets,
            &mut buffers.obj_diff,
        )?;
        if self.config.cross_validate {
            return Ok(());
        }

        io.backend
            .backward(buffers.obj_diff.view(), &mut buffers.back_diff)?;
        self.nnet
            .backpropagate(buffers.back_diff.view(), &mut buffers.in_diff)?;
        // online update: every bunch moves the code right away
        let gradient = self.manager.aggregate_gradient(&self.nnet);
        self.manager.apply_update(&mut self.nnet, gradient.view())?;
        summary.code_updates += 1;
        Ok(())
    }

    fn log_summary(&self) {
        let report = &self.report;
        info!(
            "{} FINISHED {:.2}min, fps {:.1}, feature wait {:.2}s",
            report.mode(),
            report.elapsed_secs / 60.0,
            report.frames_per_second(),
            report.feature_wait_secs
        );
        info!("Done {} sets.", report.groups);
        info!(
            "Done {} files, {} with no alignments, {} too long, {} with wrong alignment length.",
            report.utterances,
            report.skipped.missing_alignment,
            report.skipped.too_long,
            report.skipped.length_mismatch
        );
        info!(
            "Xent:: {} frames, loss per frame {:.4}, frame accuracy {:.2}%",
            report.loss.frames,
            report.loss.mean_loss(),
            report.loss.frame_accuracy() * 100.0
        );
    }
}
