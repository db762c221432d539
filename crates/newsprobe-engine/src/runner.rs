use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local};
use newsprobe_contracts::config::ExperimentConfig;
use newsprobe_contracts::models::{ModelRegistry, ModelSpec};
use newsprobe_contracts::runs::summary::now_utc_iso;
use newsprobe_contracts::runs::{
    condition_means, write_summary, write_transcript, ExecutionResult, RunSummary, StatsTable,
    TranscriptEntry, TranscriptHeader, RESULTS_FILE, RUN_DIR_FORMAT, STATS_FILE, SUMMARY_FILE,
    TRANSCRIPT_FILE,
};
use newsprobe_contracts::store::{DemographicRegistry, DialogStore, NewsStore};
use tracing::info;

use crate::compose::Composer;
use crate::conversation::Conversation;
use crate::credentials::Credentials;
use crate::dispatch::hosted::host_name;
use crate::dispatch::Dispatcher;

/// Artifacts of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_dir: PathBuf,
    pub result: ExecutionResult,
    pub table: StatsTable,
    pub summary: RunSummary,
}

pub struct ExperimentRunner {
    config: ExperimentConfig,
    config_path: Option<PathBuf>,
    registry: ModelRegistry,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
            registry: ModelRegistry::new(None),
        }
    }

    /// Full pipeline with the backend the configured model names. `Ok(None)`
    /// when no experiment was requested.
    pub fn run(&self) -> Result<Option<RunOutcome>> {
        if self.config.experiment.is_none() {
            info!("no experiment requested, nothing to do");
            return Ok(None);
        }
        let model = self.registry.resolve(&self.config.model)?;
        let credentials = Rc::new(Credentials::from_paths(&self.config.paths));
        let dispatcher = Dispatcher::for_model(&model, &self.config, credentials)?;
        self.run_with(&model, &dispatcher)
    }

    /// Same as [`ExperimentRunner::run`] against a caller-provided dispatcher.
    pub fn run_with(
        &self,
        model: &ModelSpec,
        dispatcher: &Dispatcher,
    ) -> Result<Option<RunOutcome>> {
        let Some(experiment) = self.config.experiment else {
            info!("no experiment requested, nothing to do");
            return Ok(None);
        };
        let paths = &self.config.paths;
        let news = NewsStore::load(&paths.news_path())?;
        let dialogs = DialogStore::load(&paths.dialogs_path())?;
        let registry = self.load_demographics()?;

        let started_at = now_utc_iso();
        let run_dir = create_run_dir(&paths.results_dir, Local::now())?;
        let run_id = run_dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        self.archive_inputs(&run_dir)?;
        info!(
            run = %run_id,
            model = %model.name,
            experiment = experiment.as_str(),
            debug = self.config.debug,
            "run started"
        );

        let composer = Composer::new(&news, &dialogs, &registry, paths, &self.config.detail);
        let conversation = Conversation::new(&composer, dispatcher, model, &self.config);
        let mut result = ExecutionResult::new(model.name.clone(), experiment);
        let mut entries: Vec<TranscriptEntry> = Vec::new();
        for &with_img in experiment.conditions() {
            let output = conversation.ask_news(&self.config.news_ids, with_img)?;
            for (news_id, arrays) in &output.scores {
                result.record(news_id, with_img, arrays.clone());
            }
            entries.extend(output.transcript_entries());
        }

        let table = StatsTable::compute(&result);
        result.write(&run_dir.join(RESULTS_FILE))?;
        table.write_csv(&run_dir.join(STATS_FILE))?;
        let header = TranscriptHeader {
            command: std::env::args().collect::<Vec<_>>().join(" "),
            host: host_name(),
            config: self.config.describe()?,
        };
        write_transcript(&run_dir.join(TRANSCRIPT_FILE), &header, &table, &entries)?;

        let summary = RunSummary {
            run_id: run_id.clone(),
            model: model.name.clone(),
            short_name: model.short_name.clone(),
            experiment: experiment.as_str().to_string(),
            dialogs_pre: self.config.dialogs_pre.clone(),
            dialogs_post: self.config.dialogs_post.clone(),
            n_returns: self.config.n_returns,
            started_at,
            finished_at: now_utc_iso(),
            with_image: condition_means(&result, true),
            without_image: condition_means(&result, false),
        };
        write_summary(&run_dir.join(SUMMARY_FILE), &summary, None)?;
        info!(
            run = %run_id,
            dir = %run_dir.display(),
            items = result.per_news.len(),
            "run finished"
        );

        Ok(Some(RunOutcome {
            run_dir,
            result,
            table,
            summary,
        }))
    }

    fn load_demographics(&self) -> Result<DemographicRegistry> {
        let path = self.config.paths.demographics_path();
        match &self.config.demographics {
            Some(demographics) => {
                let registry = DemographicRegistry::load(&path)?;
                registry.validate(demographics)?;
                Ok(registry)
            }
            None if path.is_file() => DemographicRegistry::load(&path),
            None => Ok(DemographicRegistry::default()),
        }
    }

    fn archive_inputs(&self, run_dir: &Path) -> Result<()> {
        let paths = &self.config.paths;
        if let Some(config_path) = &self.config_path {
            copy_into(config_path, &run_dir.join("src"))?;
        }
        let data_dir = run_dir.join("data");
        copy_into(&paths.news_path(), &data_dir)?;
        copy_into(&paths.dialogs_path(), &data_dir)?;
        let demographics = paths.demographics_path();
        if demographics.is_file() {
            copy_into(&demographics, &data_dir)?;
        }
        Ok(())
    }
}

/// Creates the timestamped run folder with its `src/` and `data/`
/// subfolders, moving one second forward while the name is taken.
pub fn create_run_dir(results_dir: &Path, started: DateTime<Local>) -> Result<PathBuf> {
    let mut stamp = started;
    let run_dir = loop {
        let candidate = results_dir.join(stamp.format(RUN_DIR_FORMAT).to_string());
        if !candidate.exists() {
            break candidate;
        }
        stamp += Duration::seconds(1);
    };
    for sub in ["src", "data"] {
        std::fs::create_dir_all(run_dir.join(sub))
            .with_context(|| format!("failed creating {}", run_dir.join(sub).display()))?;
    }
    Ok(run_dir)
}

fn copy_into(file: &Path, dir: &Path) -> Result<()> {
    let name = file
        .file_name()
        .with_context(|| format!("cannot archive {}", file.display()))?;
    std::fs::copy(file, dir.join(name))
        .with_context(|| format!("failed archiving {}", file.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;

    use anyhow::Result;
    use chrono::{Local, TimeZone};
    use image::DynamicImage;
    use newsprobe_contracts::config::{Experiment, ExperimentConfig, PathsConfig};
    use newsprobe_contracts::models::{Backend, Endpoint, ModelRef, ModelSpec};
    use newsprobe_contracts::prompt::ComposedPrompt;
    use newsprobe_contracts::runs::{read_summary, ExecutionResult};
    use serde_json::json;

    use super::{create_run_dir, ExperimentRunner};
    use crate::dispatch::{CompletionBackend, Dispatcher, SamplingParams};

    fn write_inputs(root: &Path) -> Result<PathsConfig> {
        let data = root.join("data");
        std::fs::create_dir_all(&data)?;
        std::fs::write(
            data.join("news.json"),
            serde_json::to_string(&json!([
                {"id": 2, "title": "Vote", "content": "Turnout breaks record", "image": "f002.png"},
                {"id": 10, "title": "Storm", "content": "Flooding reported downtown"}
            ]))?,
        )?;
        std::fs::write(
            data.join("dialogs.json"),
            serde_json::to_string(&json!([
                {"id": "ask_share", "content": "Would you share it? Answer <yes> or <no>."}
            ]))?,
        )?;
        Ok(PathsConfig {
            data_dir: data,
            images_dir: root.join("imgs"),
            results_dir: root.join("res"),
            ..PathsConfig::default()
        })
    }

    fn config(paths: PathsConfig, experiment: Option<Experiment>) -> ExperimentConfig {
        ExperimentConfig {
            experiment,
            dialogs_post: vec!["ask_share".to_string()],
            debug: true,
            n_returns: 1,
            paths,
            ..ExperimentConfig::default()
        }
    }

    struct AlternatingBackend {
        calls: Rc<RefCell<usize>>,
    }

    impl CompletionBackend for AlternatingBackend {
        fn name(&self) -> &str {
            "alternating"
        }

        fn complete(
            &self,
            _prompt: &ComposedPrompt,
            _image: Option<&DynamicImage>,
            params: &SamplingParams,
        ) -> Result<Vec<String>> {
            *self.calls.borrow_mut() += 1;
            Ok((0..params.n)
                .map(|i| if i % 2 == 0 { "<yes>" } else { "<no>" }.to_string())
                .collect())
        }
    }

    #[test]
    fn dry_run_writes_every_artifact() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let paths = write_inputs(temp.path())?;
        let config_file = temp.path().join("exp.toml");
        std::fs::write(&config_file, "debug = true\n")?;
        let mut config = config(paths, Some(Experiment::Both));
        config.model = ModelRef::Name("llava-hf/llava-v1.6-mistral-7b-hf".to_string());
        let runner = ExperimentRunner::new(config, Some(config_file));

        let outcome = runner.run()?.expect("experiment requested");
        for file in ["res.bin", "res.csv", "log.txt", "summary.json"] {
            assert!(outcome.run_dir.join(file).is_file(), "{file}");
        }
        assert!(outcome.run_dir.join("src/exp.toml").is_file());
        assert!(outcome.run_dir.join("data/news.json").is_file());
        assert!(outcome.run_dir.join("data/dialogs.json").is_file());

        let stored = ExecutionResult::read(&outcome.run_dir.join("res.bin"))?;
        assert_eq!(stored, outcome.result);
        assert_eq!(stored.model, "llava-hf/llava-v1.6-mistral-7b-hf");
        assert_eq!(stored.per_news.len(), 2);

        let summary = read_summary(&outcome.run_dir.join("summary.json"))?;
        assert_eq!(summary.experiment, "both");
        assert_eq!(summary.short_name, "ll167b");
        let with_image = summary.with_image.expect("image condition ran");
        assert_eq!(with_image.unknown, 1.0);

        let log = std::fs::read_to_string(outcome.run_dir.join("log.txt"))?;
        assert!(log.contains("News 2 with image f002.png"));
        assert!(log.contains("News 10 with no image"));
        assert!(log.contains("COMPLETION #0:\ntest_only"));
        Ok(())
    }

    #[test]
    fn single_condition_leaves_the_other_mean_empty() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let paths = write_inputs(temp.path())?;
        let mut config = config(paths, Some(Experiment::NewsNoimage));
        config.debug = false;
        config.n_returns = 4;
        config.model = ModelRef::Name("gpt-4o".to_string());
        let runner = ExperimentRunner::new(config, None);
        let calls = Rc::new(RefCell::new(0));
        let dispatcher = Dispatcher::new(Box::new(AlternatingBackend {
            calls: Rc::clone(&calls),
        }));
        let model = ModelSpec {
            name: "gpt-4o".to_string(),
            short_name: "gpt4o".to_string(),
            endpoint: Endpoint::Chat,
            backend: Backend::Hosted,
        };

        let outcome = runner
            .run_with(&model, &dispatcher)?
            .expect("experiment requested");
        assert_eq!(*calls.borrow(), 2);
        assert!(outcome.summary.with_image.is_none());
        let without = outcome.summary.without_image.expect("text condition ran");
        assert_eq!(without.yes, 0.5);
        assert_eq!(without.no, 0.5);

        let csv = std::fs::read_to_string(outcome.run_dir.join("res.csv"))?;
        assert!(csv.starts_with("News,Fraction of YES\n"));
        assert!(csv.contains("2,0.500\n"));
        assert!(!outcome.run_dir.join("src").read_dir()?.any(|_| true));
        Ok(())
    }

    #[test]
    fn no_experiment_creates_nothing() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let paths = write_inputs(temp.path())?;
        let results_dir = paths.results_dir.clone();
        let runner = ExperimentRunner::new(config(paths, None), None);

        assert!(runner.run()?.is_none());
        assert!(!results_dir.exists());
        Ok(())
    }

    #[test]
    fn missing_news_file_fails_before_any_folder_is_made() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let paths = PathsConfig {
            data_dir: temp.path().join("nowhere"),
            results_dir: temp.path().join("res"),
            ..PathsConfig::default()
        };
        let runner = ExperimentRunner::new(config(paths, Some(Experiment::NewsNoimage)), None);

        let err = runner.run().unwrap_err();
        assert!(format!("{err:#}").contains("news.json"));
        assert!(!temp.path().join("res").exists());
        Ok(())
    }

    #[test]
    fn run_folder_name_moves_past_taken_seconds() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let started = Local
            .with_ymd_and_hms(2025, 2, 3, 10, 4, 12)
            .single()
            .expect("unambiguous local time");

        let first = create_run_dir(temp.path(), started)?;
        let second = create_run_dir(temp.path(), started)?;
        assert!(first.ends_with("25-02-03_10-04-12"));
        assert!(second.ends_with("25-02-03_10-04-13"));
        assert!(second.join("src").is_dir());
        assert!(second.join("data").is_dir());
        Ok(())
    }
}
