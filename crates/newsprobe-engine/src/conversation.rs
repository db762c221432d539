use anyhow::Result;
use indexmap::IndexMap;
use newsprobe_contracts::classify::{ClassificationArrays, ReplyClassifier};
use newsprobe_contracts::config::ExperimentConfig;
use newsprobe_contracts::models::ModelSpec;
use newsprobe_contracts::prompt::ComposedPrompt;
use newsprobe_contracts::runs::TranscriptEntry;
use tracing::{debug, warn};

use crate::compose::{load_image, Composer, PromptOptions};
use crate::dispatch::{Dispatcher, SamplingParams};

/// Everything one pass over the news produced, index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationOutput {
    pub news_ids: Vec<String>,
    /// Pruned of image payloads.
    pub prompts: Vec<ComposedPrompt>,
    pub completions: Vec<Vec<String>>,
    pub image_names: Vec<String>,
    pub scores: IndexMap<String, ClassificationArrays>,
}

impl ConversationOutput {
    pub fn transcript_entries(&self) -> Vec<TranscriptEntry> {
        self.news_ids
            .iter()
            .zip(&self.prompts)
            .zip(&self.completions)
            .zip(&self.image_names)
            .map(|(((news_id, prompt), completions), image_name)| TranscriptEntry {
                news_id: news_id.clone(),
                image_name: image_name.clone(),
                prompt: prompt.clone(),
                completions: completions.clone(),
            })
            .collect()
    }
}

pub struct Conversation<'a> {
    composer: &'a Composer<'a>,
    dispatcher: &'a Dispatcher,
    classifier: ReplyClassifier,
    model: &'a ModelSpec,
    config: &'a ExperimentConfig,
}

impl<'a> Conversation<'a> {
    pub fn new(
        composer: &'a Composer<'a>,
        dispatcher: &'a Dispatcher,
        model: &'a ModelSpec,
        config: &'a ExperimentConfig,
    ) -> Self {
        Self {
            composer,
            dispatcher,
            classifier: ReplyClassifier::new(config.strict),
            model,
            config,
        }
    }

    /// Composes, completes and classifies every requested news item (all
    /// of them when `news_ids` is empty) under one image condition.
    pub fn ask_news(&self, news_ids: &[String], with_img: bool) -> Result<ConversationOutput> {
        let news_ids = if news_ids.is_empty() {
            self.composer.news_ids()
        } else {
            news_ids.to_vec()
        };
        let options = PromptOptions {
            pre: &self.config.dialogs_pre,
            post: &self.config.dialogs_post,
            with_img,
            info_source: self.config.info_source,
            info_more: self.config.info_more,
            demographics: self.config.demographics.as_ref(),
        };
        let params = SamplingParams::from_config(self.config);
        let condition = if with_img { "img + txt" } else { "only txt" };

        let mut output = ConversationOutput::default();
        for news_id in news_ids {
            debug!(news_id = %news_id, condition, "processing news");
            let formatted = self.composer.format_prompt(
                &news_id,
                &self.model.backend,
                self.model.endpoint,
                &options,
            )?;
            let image = match &formatted.detached_image {
                Some(path) if !self.dispatcher.is_dry_run() => Some(load_image(path)?),
                _ => None,
            };

            let completions = match self
                .dispatcher
                .dispatch(&formatted.prompt, image.as_ref(), &params)?
            {
                Some(completions) => completions,
                None => {
                    warn!(news_id = %news_id, "no completions, item counted with zero samples");
                    Vec::new()
                }
            };
            let arrays = self.classifier.check_reply(&completions)?;

            output.prompts.push(formatted.prompt.prune());
            output.completions.push(completions);
            output.image_names.push(formatted.image_name);
            output.scores.insert(news_id.clone(), arrays);
            output.news_ids.push(news_id);
        }
        Ok(output)
    }
}
