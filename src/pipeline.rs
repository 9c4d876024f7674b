use std::collections::HashSet;
use std::{thread, time::Duration};

use log::{debug, error, info, warn};

use crate::classifier::{confession_number, is_confession};
use crate::error::BotError;
use crate::publisher::Publisher;
use crate::renderer::ImageRenderer;
use crate::source::{Post, PostSource};
use crate::state::StateStore;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    FetchingPosts,
    ProcessingQueue,
    Aborted,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every queued post was handled.
    Completed,

    /// A render or publish failure stopped the queue; `post_id` was not
    /// recorded and will be retried next run.
    Stopped { post_id: String, reason: String },

    /// The run ended before or during processing without a per-post cause.
    Aborted { reason: String },

    /// Another run held the lock, nothing was done.
    Skipped,
}

/// Summary of a run, returned whatever happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Posts returned by the source.
    pub fetched: usize,
    /// Posts not seen before.
    pub queued: usize,
    /// Confessions published.
    pub published: usize,
    /// Non-confessions recorded without publishing.
    pub ignored: usize,
}

impl RunReport {
    pub fn skipped() -> Self {
        Self::with_outcome(RunOutcome::Skipped)
    }

    fn with_outcome(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            fetched: 0,
            queued: 0,
            published: 0,
            ignored: 0,
        }
    }
}

/// Fixed inputs of a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub page_name: String,
    pub page_depth: u32,
    /// Pause before every publish except the first in a run.
    pub publish_delay: Duration,
}

/// Sequences fetch, classify, render, publish and record for one run.
///
/// Collaborators are borrowed so the caller decides their lifetime; the
/// publisher is `None` when credentials are missing, which makes every run
/// abort before any request.
pub struct Pipeline<'a> {
    source: &'a dyn PostSource,
    renderer: &'a dyn ImageRenderer,
    publisher: Option<&'a dyn Publisher>,
    settings: PipelineSettings,
    state: RunState,
    visited: Vec<RunState>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn PostSource,
        renderer: &'a dyn ImageRenderer,
        publisher: Option<&'a dyn Publisher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            renderer,
            publisher,
            settings,
            state: RunState::Idle,
            visited: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// States the last run passed through, in order, ending in `Idle`.
    pub fn visited(&self) -> &[RunState] {
        &self.visited
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.visited.push(next);
    }

    /// Execute one run against `store`.
    ///
    /// Never fails: every error is logged and reflected in the report, and
    /// the pipeline is back in `Idle` when this returns.
    pub fn run(&mut self, store: &mut StateStore) -> RunReport {
        info!("Starting at {}", chrono::Local::now().to_rfc3339());
        self.visited.clear();
        let report = self.execute(store);

        match &report.outcome {
            RunOutcome::Completed => info!(
                "Run complete: {} published, {} ignored, {} already seen",
                report.published,
                report.ignored,
                report.fetched - report.queued
            ),
            RunOutcome::Stopped { post_id, .. } => warn!(
                "Run stopped at post {} after {} published; it will be retried next run",
                post_id, report.published
            ),
            RunOutcome::Aborted { reason } => warn!("Run aborted: {}", reason),
            RunOutcome::Skipped => {}
        }

        self.transition(RunState::Idle);
        report
    }

    fn execute(&mut self, store: &mut StateStore) -> RunReport {
        let Some(publisher) = self.publisher else {
            error!("ERROR: Publisher unavailable, API credentials are missing");
            self.transition(RunState::Aborted);
            return RunReport::with_outcome(RunOutcome::Aborted {
                reason: "publisher unavailable".to_string(),
            });
        };

        self.transition(RunState::FetchingPosts);
        info!("Retrieving new posts");
        let posts = match self
            .source
            .fetch_recent(&self.settings.page_name, self.settings.page_depth)
        {
            Ok(posts) => posts,
            Err(e) => {
                error!("ERROR: Failed to retrieve new posts: {}", e);
                self.transition(RunState::Aborted);
                return RunReport::with_outcome(RunOutcome::Aborted {
                    reason: BotError::from(e).to_string(),
                });
            }
        };

        let fetched = posts.len();
        let queue = pending_posts(posts, store);
        info!("Successfully retrieved {} new posts", queue.len());

        self.transition(RunState::ProcessingQueue);
        let mut report = RunReport {
            outcome: RunOutcome::Completed,
            fetched,
            queued: queue.len(),
            published: 0,
            ignored: 0,
        };

        for post in &queue {
            match self.process_post(post, publisher, report.published) {
                Ok(true) => report.published += 1,
                Ok(false) => report.ignored += 1,
                Err(e) => {
                    error!("ERROR: Failed to send post {}: {}", post.id, e);
                    self.transition(RunState::Aborted);
                    report.outcome = RunOutcome::Stopped {
                        post_id: post.id.clone(),
                        reason: e.to_string(),
                    };
                    return report;
                }
            }

            if let Err(e) = store.record_published(&post.id) {
                error!("ERROR: Failed to record post {}: {}", post.id, e);
                self.transition(RunState::Aborted);
                report.outcome = RunOutcome::Aborted {
                    reason: BotError::from(e).to_string(),
                };
                return report;
            }
        }

        report
    }

    /// Render and publish `post` if it is a confession.
    ///
    /// Returns whether anything was published.
    fn process_post(
        &self,
        post: &Post,
        publisher: &dyn Publisher,
        published_so_far: usize,
    ) -> Result<bool, BotError> {
        if !is_confession(post) {
            debug!("Post {} is not a confession", post.id);
            return Ok(false);
        }
        let Some(text) = post.text.as_deref() else {
            return Ok(false);
        };

        match confession_number(post) {
            Some(number) => info!("Post {} is confession #{}", post.id, number),
            None => info!("Post {} is a confession", post.id),
        }

        let image = self.renderer.render(text)?;
        debug!(
            "Rendered post {} as {}x{} image ({} bytes)",
            post.id,
            image.width,
            image.height,
            image.bytes.len()
        );

        if published_so_far > 0 && !self.settings.publish_delay.is_zero() {
            thread::sleep(self.settings.publish_delay);
        }

        publisher.publish(&image, post)?;
        Ok(true)
    }
}

/// Drop posts already in `store` (and repeats within the fetch) and order the
/// rest oldest first.
///
/// The source lists newest first, so reversing keeps the publish order
/// chronological.
pub fn pending_posts(posts: Vec<Post>, store: &StateStore) -> Vec<Post> {
    let mut queued = HashSet::new();
    let mut pending: Vec<Post> = posts
        .into_iter()
        .filter(|post| !store.contains(&post.id) && queued.insert(post.id.clone()))
        .collect();
    pending.reverse();
    pending
}
