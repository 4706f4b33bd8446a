//! Harness running several parties on threads over a [`LocalNetwork`].

use crate::config::Config;
use crate::error::Result;
use crate::networking::{Communicator, LocalNetwork};
use crate::prng::RawSeed;
use crate::session::Session;
use crate::triples::{TripleProvider, TrustedDealer};
use ndarray::ArrayD;
use tracing_subscriber::EnvFilter;

pub(crate) type ProviderFactory = Box<dyn Fn(usize) -> Box<dyn TripleProvider> + Sync>;

pub(crate) struct TestSetup {
    pub config: Config,
    pub provider: ProviderFactory,
}

impl TestSetup {
    /// Seeded dealer so that failures reproduce.
    pub fn with_config(config: Config, world_size: usize) -> TestSetup {
        let dealer = TrustedDealer::new(RawSeed([42u8; 16]), world_size);
        TestSetup {
            config,
            provider: Box::new(move |rank| {
                Box::new(dealer.provider(rank)) as Box<dyn TripleProvider>
            }),
        }
    }
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run `f` at every party and collect the per-rank results.
pub(crate) fn run_parties_with<F, T>(world_size: usize, setup: TestSetup, f: F) -> Vec<Result<T>>
where
    F: Fn(&Session) -> Result<T> + Sync,
    T: Send,
{
    init_tracing();
    let comms = LocalNetwork::new(world_size);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let provider = (setup.provider)(comm.rank());
                let config = setup.config.clone();
                s.spawn(move || {
                    let sess = Session::new(Box::new(comm), provider, config)?;
                    f(&sess)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("party thread panicked"))
            .collect()
    })
}

pub(crate) fn run_parties<F, T>(world_size: usize, f: F) -> Vec<T>
where
    F: Fn(&Session) -> Result<T> + Sync,
    T: Send,
{
    run_parties_with(
        world_size,
        TestSetup::with_config(Config::default(), world_size),
        f,
    )
    .into_iter()
    .enumerate()
    .map(|(rank, res)| res.unwrap_or_else(|e| panic!("rank {} failed: {}", rank, e)))
    .collect()
}

/// Within 5% relative error, or 0.005 absolute error near zero.
pub(crate) fn assert_close(actual: &ArrayD<f64>, expected: &ArrayD<f64>) {
    assert_eq!(actual.shape(), expected.shape());
    for (a, e) in actual.iter().zip(expected.iter()) {
        let diff = (a - e).abs();
        let rel = diff / (a.abs() + e.abs()).max(f64::MIN_POSITIVE);
        assert!(
            rel <= 0.05 || diff <= 0.005,
            "got {} expected {}\nactual: {}\nexpected: {}",
            a,
            e,
            actual,
            expected
        );
    }
}

/// Deterministic uniform test data.
pub(crate) fn uniform(shape: &[usize], low: f64, high: f64, seed: u64) -> ArrayD<f64> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
    ArrayD::from_shape_simple_fn(ndarray::IxDyn(shape), || rng.random_range(low..high))
}
