use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use rust_decimal::Decimal;
use tracing::{debug, error, trace, warn};

use crate::{
    account::{AccountError, AccountWriter},
    config::CoordinatorConfig,
};

use super::{DepositResult, TransactionCoordinator, TxResult, lock_registry::LockRegistry};

/// Coordinator that serializes mutations per account with one lock per
/// identifier.
///
/// Transfers take both account locks in ascending identifier order, so two
/// transfers over the same pair always wait on each other in the same
/// order and can't deadlock. Every lock wait is bounded by the configured
/// timeout.
///
/// A store error or a panic inside the locked region is reported as
/// `ERROR_UNKNOWN`; the locks are released either way.
///
/// Known limitations:
/// 1. the lock registry never shrinks;
/// 2. account existence is checked before locking and not re-checked after.
pub struct SimpleCoordinator<S> {
    store: Arc<S>,
    locks: LockRegistry,
    lock_timeout: Duration,
}

impl<S> SimpleCoordinator<S>
where
    S: AccountWriter,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &CoordinatorConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: &CoordinatorConfig) -> Self {
        Self {
            store,
            locks: LockRegistry::default(),
            lock_timeout: config.lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Account locks used by this coordinator. Holding one of them from
    /// another thread makes every operation on that account time out.
    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Runs `func` while holding the lock of `id`.
    pub(crate) fn run_tx<F>(&self, id: &str, func: F) -> DepositResult
    where
        F: FnOnce() -> Result<DepositResult, AccountError>,
    {
        debug_assert!(!id.is_empty());

        let lock = self.locks.get_or_create(id);
        let Some(_guard) = lock.try_lock_for(self.lock_timeout) else {
            debug!(account = id, timeout = ?self.lock_timeout, "lock wait timed out");
            return DepositResult::ErrorTimeout;
        };

        match panic::catch_unwind(AssertUnwindSafe(func)) {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(account = id, error = %err, "locked mutation failed");
                DepositResult::ErrorUnknown
            }
            Err(_) => {
                error!(account = id, "locked mutation panicked");
                DepositResult::ErrorUnknown
            }
        }
    }

    /// Runs `func` while holding the locks of both accounts. Locks are taken
    /// in ascending identifier order whatever the argument order is.
    pub(crate) fn run_pair_tx<F>(&self, first: &str, second: &str, func: F) -> TxResult
    where
        F: FnOnce() -> Result<TxResult, AccountError>,
    {
        debug_assert!(!first.is_empty());
        debug_assert!(!second.is_empty());

        if first > second {
            return self.run_pair_tx(second, first, func);
        }

        let first_lock = self.locks.get_or_create(first);
        let Some(_first_guard) = first_lock.try_lock_for(self.lock_timeout) else {
            debug!(account = first, timeout = ?self.lock_timeout, "lock wait timed out");
            return TxResult::ErrorTimeout;
        };
        let second_lock = self.locks.get_or_create(second);
        let Some(_second_guard) = second_lock.try_lock_for(self.lock_timeout) else {
            debug!(account = second, timeout = ?self.lock_timeout, "lock wait timed out");
            return TxResult::ErrorTimeout;
        };

        match panic::catch_unwind(AssertUnwindSafe(func)) {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(first, second, error = %err, "locked mutation failed");
                TxResult::ErrorUnknown
            }
            Err(_) => {
                error!(first, second, "locked mutation panicked");
                TxResult::ErrorUnknown
            }
        }
    }

    /// Debit then credit. Both locks must be held by the caller.
    fn move_funds(&self, from: &str, to: &str, amount: Decimal) -> Result<TxResult, AccountError> {
        if self.store.reduce(from, amount)?.is_none() {
            return Ok(TxResult::ErrorInsufficientAmount);
        }

        let credited = match self.store.deposit(to, amount) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(AccountError::AccountNotFound { id: to.to_owned() }),
            Err(err) => Err(err),
        };
        if let Err(err) = credited {
            // undo the debit, it was just taken from this balance
            self.store.deposit(from, amount)?;
            return Err(err);
        }

        trace!(from, to, %amount, "transfer committed");
        Ok(TxResult::Success)
    }
}

impl<S> TransactionCoordinator for SimpleCoordinator<S>
where
    S: AccountWriter,
{
    fn deposit(&self, id: &str, amount: Option<Decimal>) -> DepositResult {
        if id.is_empty() {
            return DepositResult::ErrorNotFound;
        }
        let Some(amount) = valid_amount(amount) else {
            return DepositResult::ErrorIncorrectAmount;
        };

        self.run_tx(id, || {
            let balance = self.store.create_and_deposit(id, amount)?;
            trace!(account = id, %amount, %balance, "deposit committed");
            Ok(DepositResult::Success)
        })
    }

    fn transfer(&self, from: &str, to: &str, amount: Option<Decimal>) -> TxResult {
        if from.is_empty() || !self.store.exists(from) {
            return TxResult::ErrorFromNotFound;
        }
        if to.is_empty() || !self.store.exists(to) {
            return TxResult::ErrorToNotFound;
        }
        if from == to {
            return TxResult::ErrorSameFromTo;
        }
        let Some(amount) = valid_amount(amount) else {
            return TxResult::ErrorIncorrectAmount;
        };

        self.run_pair_tx(from, to, || self.move_funds(from, to, amount))
    }
}

fn valid_amount(amount: Option<Decimal>) -> Option<Decimal> {
    amount.filter(|amount| *amount >= Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            mpsc,
        },
        thread,
    };

    use rust_decimal_macros::dec;

    use crate::account::{AccountId, AccountReader, InMemoryAccountStore};

    use super::*;

    const TEST_1: &str = "test 1";
    const TEST_2: &str = "test 2";
    const TEST_3: &str = "test 3";

    /// Store whose mutations can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryAccountStore,
        fail: AtomicBool,
        fail_credit_only: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self, id: &str) -> Result<(), AccountError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(AccountError::BalanceOverflow { id: id.to_owned() })
            } else {
                Ok(())
            }
        }
    }

    impl AccountReader for FlakyStore {
        fn exists(&self, id: &str) -> bool {
            self.inner.exists(id)
        }

        fn all_accounts(&self) -> Vec<AccountId> {
            self.inner.all_accounts()
        }

        fn balance(&self, id: &str) -> Option<Decimal> {
            self.inner.balance(id)
        }
    }

    impl AccountWriter for FlakyStore {
        fn reduce(&self, id: &str, amount: Decimal) -> Result<Option<Decimal>, AccountError> {
            self.check(id)?;
            self.inner.reduce(id, amount)
        }

        fn deposit(&self, id: &str, amount: Decimal) -> Result<Option<Decimal>, AccountError> {
            self.check(id)?;
            // fail once, the compensating credit goes through
            if self.fail_credit_only.swap(false, Ordering::SeqCst) {
                return Err(AccountError::BalanceOverflow { id: id.to_owned() });
            }
            self.inner.deposit(id, amount)
        }

        fn create_and_deposit(&self, id: &str, amount: Decimal) -> Result<Decimal, AccountError> {
            self.check(id)?;
            self.inner.create_and_deposit(id, amount)
        }
    }

    fn flaky() -> (Arc<FlakyStore>, SimpleCoordinator<FlakyStore>) {
        let store = Arc::new(FlakyStore::default());
        let coordinator = SimpleCoordinator::new(Arc::clone(&store));
        (store, coordinator)
    }

    /// Coordinator that never waits for a lock, with two funded accounts.
    fn fail_fast() -> SimpleCoordinator<InMemoryAccountStore> {
        let config = CoordinatorConfig {
            lock_timeout: Duration::ZERO,
        };
        let coordinator =
            SimpleCoordinator::with_config(Arc::new(InMemoryAccountStore::new()), &config);
        assert_eq!(coordinator.lock_timeout(), Duration::ZERO);
        assert_eq!(coordinator.deposit(TEST_1, Some(dec!(100.0))), DepositResult::Success);
        assert_eq!(coordinator.deposit(TEST_2, Some(dec!(100.0))), DepositResult::Success);
        coordinator
    }

    /// Asserts from a fresh thread that `id` can be locked right away.
    fn assert_unlocked<S>(coordinator: &SimpleCoordinator<S>, id: &str)
    where
        S: AccountWriter + Send + Sync,
    {
        thread::scope(|s| {
            let result = s
                .spawn(|| coordinator.run_tx(id, || Ok(DepositResult::Success)))
                .join()
                .unwrap();
            assert_eq!(result, DepositResult::Success, "{id} is still locked");
        });
    }

    #[test]
    fn deposit() {
        let (store, coordinator) = flaky();

        assert_eq!(coordinator.deposit("", Some(dec!(1.0))), DepositResult::ErrorNotFound);
        assert_eq!(coordinator.deposit(TEST_1, None), DepositResult::ErrorIncorrectAmount);
        assert_eq!(
            coordinator.deposit(TEST_1, Some(dec!(-1.0))),
            DepositResult::ErrorIncorrectAmount
        );
        assert!(!store.exists(TEST_1));

        assert_eq!(coordinator.deposit(TEST_1, Some(dec!(1.0))), DepositResult::Success);
        assert_eq!(coordinator.deposit(TEST_1, Some(dec!(0))), DepositResult::Success);
        assert_eq!(store.balance(TEST_1), Some(dec!(1.0)));

        store.fail.store(true, Ordering::SeqCst);
        assert_eq!(coordinator.deposit(TEST_1, Some(dec!(1.0))), DepositResult::ErrorUnknown);
        assert_eq!(store.balance(TEST_1), Some(dec!(1.0)));
    }

    #[test]
    fn transfer() {
        let (store, coordinator) = flaky();
        coordinator.deposit(TEST_1, Some(dec!(2.0)));
        coordinator.deposit(TEST_2, Some(dec!(2.0)));

        assert_eq!(
            coordinator.transfer("", TEST_2, Some(dec!(-1.0))),
            TxResult::ErrorFromNotFound
        );
        assert_eq!(
            coordinator.transfer(TEST_1, "", Some(dec!(-1.0))),
            TxResult::ErrorToNotFound
        );
        assert_eq!(
            coordinator.transfer(TEST_3, TEST_2, Some(dec!(-1.0))),
            TxResult::ErrorFromNotFound
        );
        assert_eq!(
            coordinator.transfer(TEST_1, TEST_3, Some(dec!(-1.0))),
            TxResult::ErrorToNotFound
        );
        assert_eq!(
            coordinator.transfer(TEST_1, TEST_1, Some(dec!(1.0))),
            TxResult::ErrorSameFromTo
        );
        assert_eq!(
            coordinator.transfer(TEST_2, TEST_2, None),
            TxResult::ErrorSameFromTo
        );
        assert_eq!(
            coordinator.transfer(TEST_1, TEST_2, None),
            TxResult::ErrorIncorrectAmount
        );
        assert_eq!(
            coordinator.transfer(TEST_1, TEST_2, Some(dec!(-1.0))),
            TxResult::ErrorIncorrectAmount
        );
        assert_eq!(
            coordinator.transfer(TEST_1, TEST_2, Some(dec!(100.0))),
            TxResult::ErrorInsufficientAmount
        );
        assert_eq!(
            coordinator.transfer(TEST_2, TEST_1, Some(dec!(100.0))),
            TxResult::ErrorInsufficientAmount
        );
        assert_eq!(store.balance(TEST_1), Some(dec!(2.0)));
        assert_eq!(store.balance(TEST_2), Some(dec!(2.0)));
        // validation failures never touch the lock registry
        assert_eq!(coordinator.locks().len(), 2);

        assert_eq!(
            coordinator.transfer(TEST_1, TEST_2, Some(dec!(1.0))),
            TxResult::Success
        );
        assert_eq!(store.balance(TEST_1), Some(dec!(1.0)));
        assert_eq!(store.balance(TEST_2), Some(dec!(3.0)));
        assert_eq!(
            coordinator.transfer(TEST_2, TEST_1, Some(dec!(3.0))),
            TxResult::Success
        );
        assert_eq!(store.balance(TEST_1), Some(dec!(4.0)));
        assert_eq!(store.balance(TEST_2), Some(dec!(0)));

        store.fail.store(true, Ordering::SeqCst);
        assert_eq!(
            coordinator.transfer(TEST_1, TEST_2, Some(dec!(1.0))),
            TxResult::ErrorUnknown
        );
        assert_eq!(
            coordinator.transfer(TEST_2, TEST_1, Some(dec!(1.0))),
            TxResult::ErrorUnknown
        );
        assert_eq!(store.balance(TEST_1), Some(dec!(4.0)));
        assert_eq!(store.balance(TEST_2), Some(dec!(0)));
    }

    #[test]
    fn failed_credit_restores_debit() {
        let (store, coordinator) = flaky();
        coordinator.deposit(TEST_1, Some(dec!(5)));
        coordinator.deposit(TEST_2, Some(dec!(5)));

        store.fail_credit_only.store(true, Ordering::SeqCst);
        assert_eq!(
            coordinator.transfer(TEST_1, TEST_2, Some(dec!(3))),
            TxResult::ErrorUnknown
        );
        assert_eq!(store.balance(TEST_1), Some(dec!(5)));
        assert_eq!(store.balance(TEST_2), Some(dec!(5)));
        assert_unlocked(&coordinator, TEST_1);
        assert_unlocked(&coordinator, TEST_2);
    }

    #[test]
    fn deposit_is_not_blocked_by_other_accounts() {
        let coordinator = &fail_fast();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            let holder = s.spawn(move || {
                coordinator.run_tx(TEST_1, move || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(DepositResult::Success)
                })
            });
            entered_rx.recv().unwrap();

            assert_eq!(
                coordinator.deposit(TEST_2, Some(dec!(1))),
                DepositResult::Success
            );

            release_tx.send(()).unwrap();
            assert_eq!(holder.join().unwrap(), DepositResult::Success);
        });
    }

    #[test]
    fn deposit_times_out_while_account_is_held() {
        let coordinator = &fail_fast();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            let holder = s.spawn(move || {
                coordinator.run_tx(TEST_1, move || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(DepositResult::Success)
                })
            });
            entered_rx.recv().unwrap();

            assert_eq!(
                coordinator.run_tx(TEST_1, || Ok(DepositResult::Success)),
                DepositResult::ErrorTimeout
            );
            assert_eq!(
                coordinator.deposit(TEST_1, Some(dec!(1))),
                DepositResult::ErrorTimeout
            );

            release_tx.send(()).unwrap();
            assert_eq!(holder.join().unwrap(), DepositResult::Success);
        });

        assert_eq!(
            coordinator.deposit(TEST_1, Some(dec!(1))),
            DepositResult::Success
        );
    }

    #[test]
    fn transfer_holds_both_accounts() {
        let coordinator = &fail_fast();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            let holder = s.spawn(move || {
                coordinator.run_pair_tx(TEST_1, TEST_2, move || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(TxResult::Success)
                })
            });
            entered_rx.recv().unwrap();

            let ok = || Ok(DepositResult::Success);
            assert_eq!(coordinator.run_tx(TEST_1, ok), DepositResult::ErrorTimeout);
            assert_eq!(coordinator.run_tx(TEST_2, ok), DepositResult::ErrorTimeout);
            assert_eq!(
                coordinator.run_pair_tx(TEST_1, TEST_2, || Ok(TxResult::Success)),
                TxResult::ErrorTimeout
            );
            assert_eq!(
                coordinator.run_pair_tx(TEST_2, TEST_1, || Ok(TxResult::Success)),
                TxResult::ErrorTimeout
            );
            assert_eq!(
                coordinator.transfer(TEST_2, TEST_1, Some(dec!(1))),
                TxResult::ErrorTimeout
            );
            // validation still runs before any lock is requested
            assert_eq!(
                coordinator.transfer(TEST_3, TEST_1, Some(dec!(1))),
                TxResult::ErrorFromNotFound
            );

            release_tx.send(()).unwrap();
            assert_eq!(holder.join().unwrap(), TxResult::Success);
        });

        assert_eq!(
            coordinator.transfer(TEST_2, TEST_1, Some(dec!(1))),
            TxResult::Success
        );
    }

    #[test]
    fn second_lock_timeout_releases_first() {
        let coordinator = &fail_fast();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            let holder = s.spawn(move || {
                coordinator.run_tx(TEST_2, move || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(DepositResult::Success)
                })
            });
            entered_rx.recv().unwrap();

            // "test 1" sorts first, so it is acquired before waiting on "test 2"
            assert_eq!(
                coordinator.transfer(TEST_2, TEST_1, Some(dec!(1))),
                TxResult::ErrorTimeout
            );
            assert_unlocked(coordinator, TEST_1);

            release_tx.send(()).unwrap();
            assert_eq!(holder.join().unwrap(), DepositResult::Success);
        });
    }

    #[test]
    fn failure_releases_locks() {
        let coordinator = fail_fast();

        assert_eq!(
            coordinator.run_tx(TEST_1, || Err(AccountError::AccountNotFound {
                id: TEST_1.to_owned()
            })),
            DepositResult::ErrorUnknown
        );
        assert_unlocked(&coordinator, TEST_1);

        assert_eq!(
            coordinator.run_pair_tx(TEST_2, TEST_1, || Err(AccountError::AccountNotFound {
                id: TEST_2.to_owned()
            })),
            TxResult::ErrorUnknown
        );
        assert_unlocked(&coordinator, TEST_1);
        assert_unlocked(&coordinator, TEST_2);
    }

    #[test]
    fn panic_becomes_unknown_and_releases_locks() {
        let coordinator = fail_fast();

        assert_eq!(
            coordinator.run_pair_tx(TEST_1, TEST_2, || -> Result<TxResult, AccountError> {
                panic!("mutation blew up")
            }),
            TxResult::ErrorUnknown
        );
        assert_eq!(
            coordinator.run_tx(TEST_2, || -> Result<DepositResult, AccountError> {
                panic!("mutation blew up")
            }),
            DepositResult::ErrorUnknown
        );

        assert_unlocked(&coordinator, TEST_1);
        assert_unlocked(&coordinator, TEST_2);
        assert_eq!(
            coordinator.transfer(TEST_1, TEST_2, Some(dec!(1))),
            TxResult::Success
        );
    }

    #[test]
    fn lock_owner_may_reenter() {
        let coordinator = fail_fast();
        let lock = coordinator.locks().get_or_create(TEST_1);
        let _held = lock.lock();

        assert_eq!(
            coordinator.deposit(TEST_1, Some(dec!(1))),
            DepositResult::Success
        );
        assert_eq!(
            coordinator.transfer(TEST_1, TEST_2, Some(dec!(1))),
            TxResult::Success
        );
    }
}
