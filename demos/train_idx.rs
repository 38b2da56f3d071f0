//! Train a digit classifier on MNIST IDX files and save the weights as JSON.
//!
//! cargo run --release --example train_idx -- \
//!     --train-images train-images-idx3-ubyte.gz --train-labels train-labels-idx1-ubyte.gz \
//!     --test-images t10k-images-idx3-ubyte.gz --test-labels t10k-labels-idx1-ubyte.gz \
//!     --out weights.json
//!
//! Pass `--epochs N` for shuffled full passes instead of `--steps`. Progress is logged;
//! set `RUST_LOG=info` to see it.

use digit_mlp::{idx, Activation, FitConfig, NetworkBuilder, NetworkConfig, UpdatePolicy};

fn arg<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == key)
        .map(|w| w[1].as_str())
}

fn parse_or<T: std::str::FromStr>(args: &[String], key: &str, default: T) -> T {
    match arg(args, key) {
        Some(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("failed to parse {key} value {v:?}")),
        None => default,
    }
}

fn main() -> digit_mlp::Result<()> {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    let required = |key: &str| {
        arg(&args, key).unwrap_or_else(|| panic!("missing required argument {key}"))
    };

    let train = idx::load_dataset(required("--train-images"), required("--train-labels"), 10)?;
    let test = match (arg(&args, "--test-images"), arg(&args, "--test-labels")) {
        (Some(images), Some(labels)) => Some(idx::load_dataset(images, labels, 10)?),
        _ => None,
    };
    println!("train samples: {}", train.len());

    let hidden = parse_or(&args, "--hidden", 128_usize);
    let sequential = args.iter().any(|a| a == "--sequential");
    let mut net = NetworkBuilder::from_sizes(
        &[train.image_len(), hidden, 10],
        &[Activation::Relu, Activation::Softmax],
    )?
    .config(NetworkConfig {
        update_policy: if sequential {
            UpdatePolicy::Sequential
        } else {
            UpdatePolicy::AllOrNothing
        },
        ..NetworkConfig::default()
    })
    .build_with_seed(parse_or(&args, "--seed", 0_u64))?;

    let defaults = FitConfig::default();
    let cfg = FitConfig {
        steps: parse_or(&args, "--steps", 3000),
        epochs: arg(&args, "--epochs").map(|_| parse_or(&args, "--epochs", 1)),
        batch_size: parse_or(&args, "--batch-size", defaults.batch_size),
        lr: parse_or(&args, "--lr", defaults.lr),
        log_every: parse_or(&args, "--log-every", defaults.log_every),
        seed: parse_or(&args, "--seed", defaults.seed),
    };

    let report = net.fit(&train, test.as_ref(), cfg)?;
    for e in &report.epochs {
        println!(
            "epoch {}: avg loss={:.4} avg accuracy={:.2}%",
            e.epoch,
            e.loss,
            e.accuracy * 100.0
        );
    }
    println!(
        "final batch: loss={:.4} accuracy={:.2}%",
        report.final_loss,
        report.final_accuracy * 100.0
    );
    if let Some(acc) = report.eval_accuracy {
        println!("test accuracy: {:.2}%", acc * 100.0);
    }

    if let Some(out) = arg(&args, "--out") {
        net.save_json(out)?;
        println!("saved weights to {out}");
    }
    Ok(())
}
