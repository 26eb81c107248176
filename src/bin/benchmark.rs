fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use chordsense_core::{
        dsp::chroma::FeatureExtractor,
        model::{dataset::read_wav_mono_f32, ModelStore},
        ChordClassifier, ChordVocabulary,
    };
    use serde::Serialize;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Args {
        fixtures_dir: PathBuf,
        iterations: usize,
        model_dir: Option<PathBuf>,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct CaseResult {
        file: String,
        category: String,
        iteration: usize,
        latency_ms: f64,
        label: String,
        confidence: f32,
        expected: Option<String>,
        hit: Option<bool>,
        unknown: bool,
    }

    #[derive(Debug, Clone, Serialize)]
    struct CategorySummary {
        category: String,
        runs: usize,
        p50_latency_ms: f64,
        p95_latency_ms: f64,
        avg_latency_ms: f64,
        hit_rate: Option<f64>,
        unknown_rate: f64,
        avg_confidence: f32,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        fixtures_dir: String,
        iterations: usize,
        total_runs: usize,
        total_files: usize,
        p50_latency_ms: f64,
        p95_latency_ms: f64,
        avg_latency_ms: f64,
        hit_rate: Option<f64>,
        unknown_rate: f64,
        avg_confidence: f32,
        categories: Vec<CategorySummary>,
        cases: Vec<CaseResult>,
    }

    fn parse_args() -> Result<Args, String> {
        let mut fixtures_dir: Option<PathBuf> = None;
        let mut iterations: usize = 1;
        let mut model_dir: Option<PathBuf> = None;
        let mut output: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1).peekable();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--fixtures" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --fixtures".into());
                    };
                    fixtures_dir = Some(PathBuf::from(v));
                }
                "--iterations" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --iterations".into());
                    };
                    iterations = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --iterations".to_string())?
                        .clamp(1, 10);
                }
                "--model-dir" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --model-dir".into());
                    };
                    model_dir = Some(PathBuf::from(v));
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p chordsense-core --bin benchmark -- \\
  --fixtures <dir> [--iterations <n>] [--model-dir <dir>] [--output <file.json>]

Fixtures are .wav files; a sidecar .txt with the same stem holds the
expected chord label (e.g. fixtures/clean/a-major.wav + a-major.txt)."
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }

        let fixtures_dir = fixtures_dir.unwrap_or_else(|| PathBuf::from("benchmarks/fixtures"));
        Ok(Args {
            fixtures_dir,
            iterations,
            model_dir,
            output,
        })
    }

    fn collect_wavs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
        let entries = std::fs::read_dir(dir).map_err(|e| e.to_string())?;
        for entry in entries {
            let entry = entry.map_err(|e| e.to_string())?;
            let path = entry.path();
            if path.is_dir() {
                collect_wavs(&path, out)?;
                continue;
            }
            let is_wav = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("wav"))
                .unwrap_or(false);
            if is_wav {
                out.push(path);
            }
        }
        Ok(())
    }

    fn category_for(path: &Path, fixtures_dir: &Path) -> String {
        path.strip_prefix(fixtures_dir)
            .ok()
            .and_then(|rel| rel.parent())
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "other".into())
    }

    fn expected_label_for(path: &Path) -> Option<String> {
        let expected = path.with_extension("txt");
        std::fs::read_to_string(expected)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        if sorted.len() == 1 {
            return sorted[0];
        }
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn summarize(category: String, rows: &[CaseResult]) -> CategorySummary {
        let latencies = rows.iter().map(|r| r.latency_ms).collect::<Vec<_>>();
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };
        let judged = rows.iter().filter(|r| r.hit.is_some()).count();
        let hits = rows.iter().filter(|r| r.hit == Some(true)).count();
        let unknowns = rows.iter().filter(|r| r.unknown).count();
        let avg_confidence = if rows.is_empty() {
            0.0
        } else {
            rows.iter().map(|r| r.confidence).sum::<f32>() / rows.len() as f32
        };

        CategorySummary {
            category,
            runs: rows.len(),
            p50_latency_ms: percentile(&latencies, 0.50),
            p95_latency_ms: percentile(&latencies, 0.95),
            avg_latency_ms,
            hit_rate: if judged == 0 {
                None
            } else {
                Some(hits as f64 / judged as f64)
            },
            unknown_rate: if rows.is_empty() {
                0.0
            } else {
                unknowns as f64 / rows.len() as f64
            },
            avg_confidence,
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = parse_args()?;
    if !args.fixtures_dir.exists() {
        return Err(format!(
            "fixtures directory not found: {}",
            args.fixtures_dir.display()
        ));
    }

    let mut wav_files = Vec::new();
    collect_wavs(&args.fixtures_dir, &mut wav_files)?;
    wav_files.sort();
    if wav_files.is_empty() {
        return Err(format!(
            "no .wav fixtures found in {}",
            args.fixtures_dir.display()
        ));
    }

    println!(
        "Running ChordSense benchmark on {} fixtures (iterations={})",
        wav_files.len(),
        args.iterations
    );

    let store = match args.model_dir.clone() {
        Some(dir) => ModelStore::new(dir),
        None => ModelStore::default_location(),
    };
    let vocabulary = Arc::new(ChordVocabulary::default());
    let mut classifier = ChordClassifier::new(store, vocabulary);
    let state = classifier.initialize().map_err(|e| e.to_string())?;
    println!("model state: {state:?}");

    let mut extractor = FeatureExtractor::new();
    let mut cases = Vec::new();
    for wav in &wav_files {
        let (samples, sample_rate) = read_wav_mono_f32(wav).map_err(|e| e.to_string())?;
        let expected = expected_label_for(wav);
        let category = category_for(wav, &args.fixtures_dir);
        let file = wav
            .strip_prefix(&args.fixtures_dir)
            .unwrap_or(wav)
            .display()
            .to_string();

        for iteration in 1..=args.iterations {
            let Some(features) = extractor.extract(&samples, sample_rate) else {
                return Err(format!(
                    "{}: shorter than one analysis frame",
                    wav.display()
                ));
            };
            let result = classifier
                .classify(&features.chromagram, 0)
                .map_err(|e| format!("{}: {e}", wav.display()))?;

            let unknown = result.label == "unknown";
            let hit = expected.as_ref().map(|exp| exp == &result.label);
            println!(
                "{file} [{iteration}/{iters}] {label} conf={conf:.3} {latency:.1} ms",
                iters = args.iterations,
                label = result.label,
                conf = result.confidence,
                latency = result.latency_ms
            );
            cases.push(CaseResult {
                file: file.clone(),
                category: category.clone(),
                iteration,
                latency_ms: result.latency_ms,
                label: result.label,
                confidence: result.confidence,
                expected: expected.clone(),
                hit,
                unknown,
            });
        }
    }

    let mut grouped: BTreeMap<String, Vec<CaseResult>> = BTreeMap::new();
    for row in &cases {
        grouped
            .entry(row.category.clone())
            .or_default()
            .push(row.clone());
    }
    let mut categories = Vec::new();
    for (name, rows) in grouped {
        categories.push(summarize(name, &rows));
    }

    let overall = summarize("all".into(), &cases);
    let summary = Summary {
        fixtures_dir: args.fixtures_dir.display().to_string(),
        iterations: args.iterations,
        total_runs: cases.len(),
        total_files: wav_files.len(),
        p50_latency_ms: overall.p50_latency_ms,
        p95_latency_ms: overall.p95_latency_ms,
        avg_latency_ms: overall.avg_latency_ms,
        hit_rate: overall.hit_rate,
        unknown_rate: overall.unknown_rate,
        avg_confidence: overall.avg_confidence,
        categories,
        cases,
    };

    println!(
        "Done. runs={} p50={:.1}ms p95={:.1}ms hit_rate={}",
        summary.total_runs,
        summary.p50_latency_ms,
        summary.p95_latency_ms,
        summary
            .hit_rate
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "n/a".into())
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
