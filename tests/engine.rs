use std::sync::atomic::{AtomicBool, Ordering};

use polysum::{
    channel::{Channel, SimpleChannel},
    error::Error,
    field::{F61, F97, Field},
    processor::SubProcessor,
    session::{Config, Security, Session, simulate},
};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

fn test_config(security: Security) -> Config {
    Config {
        batch_size: 8,
        challenges: 8,
        security,
        check_threshold: usize::MAX,
        triple_budget: None,
    }
}

#[tokio::test]
async fn multiplies_inputs_mod_97() -> Result<(), Error> {
    let _g = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .set_default();
    for security in [Security::Active, Security::Passive] {
        for parties in [2, 3] {
            let config = test_config(security);
            let batch_size = config.batch_size;
            let results = simulate(parties, &config, |session: Session<F97>, ch| async move {
                let i = session.party;
                let mut proc = SubProcessor::new(session, 4, 4);
                let x = [F97::from(3)];
                let y = [F97::from(4)];
                proc.input_batch(&ch, 0, &[0], (i == 0).then_some(&x[..]))
                    .await?;
                proc.input_batch(&ch, 1, &[1], (i == 1).then_some(&y[..]))
                    .await?;
                proc.multiply_batch(&ch, &[(2, 0, 1)]).await?;
                // exactly one triple was consumed out of the fresh batch
                assert_eq!(batch_size - 1, proc.session.prep.buffered_triples());
                proc.public_open_batch(&ch, &[(0, 2)]).await?;
                proc.session.check.flush(&ch).await?;
                proc.registers.clear(0)
            })
            .await;
            for result in results {
                assert_eq!(F97::from(12), result?, "{security:?} {parties} parties");
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn inputs_roundtrip_through_opening() -> Result<(), Error> {
    let parties = 3;
    let config = test_config(Security::Active);
    let results = simulate(parties, &config, |session: Session<F61>, ch| async move {
        let i = session.party;
        let mut proc = SubProcessor::new(session, 4, 4);
        let mine = [F61::from(10 + i as u64), F61::from(20 + i as u64)];
        for owner in 0..parties {
            let regs = [2 * owner, 2 * owner + 1];
            // registers 0/1 belong to party 0, 2/3 to party 1, ...
            proc.registers.resize(2 * parties, 2 * parties);
            proc.input_batch(&ch, owner, &regs, (i == owner).then_some(&mine[..]))
                .await?;
        }
        let opens: Vec<(usize, usize)> = (0..2 * parties).map(|r| (r, r)).collect();
        proc.public_open_batch(&ch, &opens).await?;
        proc.session.check.flush(&ch).await?;
        (0..2 * parties)
            .map(|r| proc.registers.clear(r))
            .collect::<Result<Vec<F61>, Error>>()
    })
    .await;
    for result in results {
        let expected: Vec<F61> = (0..parties as u64)
            .flat_map(|p| [F61::from(10 + p), F61::from(20 + p)])
            .collect();
        assert_eq!(expected, result?);
    }
    Ok(())
}

#[tokio::test]
async fn dot_products_cost_one_round() -> Result<(), Error> {
    let parties = 2;
    let config = test_config(Security::Active);
    let batch_size = config.batch_size;
    let results = simulate(parties, &config, |session: Session<F61>, ch| async move {
        let i = session.party;
        let mut proc = SubProcessor::new(session, 12, 4);
        let xs = [F61::from(1), F61::from(2), F61::from(3)];
        let ys = [F61::from(4), F61::from(5), F61::from(6)];
        proc.input_batch(&ch, 0, &[0, 1, 2], (i == 0).then_some(&xs[..]))
            .await?;
        proc.input_batch(&ch, 1, &[3, 4, 5], (i == 1).then_some(&ys[..]))
            .await?;

        let before = proc.counters();
        proc.dot_product_batch(
            &ch,
            &[
                (6, vec![(0, 3), (1, 4), (2, 5)]),
                (7, vec![(0, 3), (1, 4)]),
            ],
        )
        .await?;
        let after = proc.counters();
        // five terms, two outputs, still a single exchange round
        assert_eq!(before.rounds + 1, after.rounds);
        assert_eq!(
            before.elements_sent + 2 * 5 * (parties - 1),
            after.elements_sent
        );
        assert_eq!(batch_size - 5, proc.session.prep.buffered_triples());

        proc.public_open_batch(&ch, &[(0, 6), (1, 7)]).await?;
        proc.session.check.flush(&ch).await?;
        Ok((proc.registers.clear(0)?, proc.registers.clear(1)?))
    })
    .await;
    for result in results {
        let (long, short) = result?;
        assert_eq!(F61::from(32), long);
        assert_eq!(F61::from(14), short);
    }
    Ok(())
}

#[tokio::test]
async fn forged_share_aborts_every_party() {
    let parties = 2;
    let config = test_config(Security::Active);
    let results = simulate(parties, &config, |session: Session<F61>, ch| async move {
        let i = session.party;
        let mut proc = SubProcessor::new(session, 4, 4);
        let x = [F61::from(3)];
        proc.input_batch(&ch, 0, &[0], (i == 0).then_some(&x[..]))
            .await?;
        if i == 1 {
            // shift the value fragment without fixing up the MAC
            let mut forged = proc.registers.secret(0)?;
            forged.val += F61::ONE;
            proc.registers.set_secret(0, forged)?;
        }
        proc.public_open_batch(&ch, &[(0, 0)]).await?;
        proc.session.check.flush(&ch).await
    })
    .await;
    for result in results {
        let err = result.unwrap_err();
        assert!(matches!(err, Error::MacCheck), "got {err:?}");
        assert!(err.is_abort());
    }
}

/// Wraps a [`SimpleChannel`] and corrupts the first message sent to one
/// party, leaving everything else untouched.
struct Corrupting {
    inner: SimpleChannel,
    target: usize,
    done: AtomicBool,
}

impl Corrupting {
    fn new(inner: SimpleChannel, target: usize) -> Self {
        Corrupting {
            inner,
            target,
            done: AtomicBool::new(false),
        }
    }
}

impl Channel for Corrupting {
    type SendError = <SimpleChannel as Channel>::SendError;
    type RecvError = <SimpleChannel as Channel>::RecvError;

    async fn send_bytes_to(&self, party: usize, mut msg: Vec<u8>) -> Result<(), Self::SendError> {
        if party == self.target && !self.done.swap(true, Ordering::Relaxed) {
            // flip a bit past the length header
            if let Some(byte) = msg.get_mut(8) {
                *byte ^= 1;
            }
        }
        self.inner.send_bytes_to(party, msg).await
    }

    async fn recv_bytes_from(&self, party: usize) -> Result<Vec<u8>, Self::RecvError> {
        self.inner.recv_bytes_from(party).await
    }
}

#[tokio::test]
async fn equivocating_input_owner_aborts_receivers() {
    let parties = 3;
    let config = test_config(Security::Active);
    let results = simulate(parties, &config, |session: Session<F97>, ch| async move {
        let i = session.party;
        let mut proc = SubProcessor::new(session, 2, 2);
        // warm the mask buffer so the next messages are the input phase
        proc.session.prep.get_mask(&ch, 0).await?;
        if i == 0 {
            // sends one difference to party 1 and another to party 2
            let ch = Corrupting::new(ch, 2);
            proc.input_batch(&ch, 0, &[0], Some(&[F97::from(5)])).await
        } else {
            let err = proc.input_batch(&ch, 0, &[0], None).await.unwrap_err();
            assert!(matches!(err, Error::Broadcast(_)), "got {err:?}");
            assert!(err.is_abort());
            Ok(())
        }
    })
    .await;
    for result in results {
        result.unwrap();
    }
}

#[tokio::test]
async fn exhausted_budget_stops_multiplication() {
    let parties = 2;
    let config = Config {
        triple_budget: Some(4),
        ..test_config(Security::Active)
    };
    let results = simulate(parties, &config, |session: Session<F61>, ch| async move {
        let i = session.party;
        let mut proc = SubProcessor::new(session, 8, 2);
        let xs = [F61::from(2), F61::from(3)];
        proc.input_batch(&ch, 0, &[0, 1], (i == 0).then_some(&xs[..]))
            .await?;
        // the budget covers these four products
        proc.multiply_batch(&ch, &[(2, 0, 1), (3, 0, 1), (4, 0, 1), (5, 0, 1)])
            .await?;
        // and is spent before the fifth round-trips anything
        let err = proc.multiply_batch(&ch, &[(6, 0, 1)]).await.unwrap_err();
        assert!(matches!(err, Error::PreprocessingExhausted), "got {err:?}");
        assert!(!err.is_abort());
        proc.session.check.flush(&ch).await
    })
    .await;
    for result in results {
        result.unwrap();
    }
}
