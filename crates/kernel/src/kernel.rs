//! The kernel.

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::handler::{EventHandler, TransactionMessage};
use fornax_consensus::{ConsensusPolicy, PolicyTable, Rank, RankingEngine};
use fornax_ledger::{
    observer_sign_hash, Block, Body, ChainData, Context, ContextData, LedgerError, Loader,
    Transaction, Transactor, TxKind,
};
use fornax_reward::Rewarder;
use fornax_store::{Store, StoreError};
use fornax_txpool::{ExpireQueue, TransactionPool, TxPoolError};
use fornax_types::{
    build_level_root, double_hash, recover_public_hash, validate_signatures_majority, Address,
    Codec, Coordinate, Hash256, Header, PublicHash, Signature,
};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Pending transactions beyond this count are refused outright.
const TX_QUEUE_LIMIT: usize = 65_535;

/// The rebroadcast ladder of the transaction expiry queue.
const TX_EXPIRY_GROUPS: [Duration; 3] = [
    Duration::from_secs(60),
    Duration::from_secs(600),
    Duration::from_secs(3600),
];

/// Compute the genesis hash from the chain parameters.
///
/// `double-hash( double-hash(coord ‖ "ConsensusPolicy" ‖ policy ‖
/// "ObserverKeys" ‖ sorted observer hashes ':' separated) ‖ context-hash )`.
pub fn genesis_hash(
    chain_coord: Coordinate,
    policy: &ConsensusPolicy,
    observer_keys: &HashSet<PublicHash>,
    context_hash: Hash256,
) -> Hash256 {
    let mut buf = Vec::new();
    chain_coord.write_to(&mut buf).expect("write to Vec");
    buf.extend_from_slice(b"ConsensusPolicy");
    policy.write_to(&mut buf).expect("write to Vec");
    buf.extend_from_slice(b"ObserverKeys");
    let mut keys: Vec<String> = observer_keys.iter().map(|k| k.to_string()).collect();
    keys.sort();
    for key in keys {
        buf.extend_from_slice(key.as_bytes());
        buf.push(b':');
    }
    let inner = double_hash(&buf);
    let mut outer = Vec::with_capacity(64);
    outer.extend_from_slice(inner.as_bytes());
    outer.extend_from_slice(context_hash.as_bytes());
    double_hash(&outer)
}

/// Everything a kernel is built from.
pub struct KernelParams {
    pub config: KernelConfig,
    pub store: Arc<Store>,
    pub transactor: Arc<Transactor>,
    pub rewarder: Arc<dyn Rewarder>,
    pub policy_table: PolicyTable,
    pub observer_keys: HashSet<PublicHash>,
    /// The genesis state, applied on first run and verified afterwards.
    pub genesis_context_data: ContextData,
}

/// The proof-of-formulation block pipeline.
pub struct Kernel {
    config: KernelConfig,
    policy: ConsensusPolicy,
    store: Arc<Store>,
    transactor: Arc<Transactor>,
    engine: RankingEngine,
    rewarder: Arc<dyn Rewarder>,
    observer_keys: HashSet<PublicHash>,
    tx_pool: Arc<TransactionPool>,
    tx_queue: Mutex<ExpireQueue<Hash256, TransactionMessage>>,
    tx_working: Mutex<HashSet<Hash256>>,
    tx_signers: Mutex<HashMap<Hash256, Vec<PublicHash>>>,
    event_handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    /// Serializes the store-mutating path (validate/process/generate).
    process_lock: Mutex<()>,
    close_lock: RwLock<()>,
    is_close: AtomicBool,
    started: Instant,
}

impl Kernel {
    /// Build a kernel, applying or verifying genesis as needed.
    pub fn new(params: KernelParams) -> Result<Self, KernelError> {
        let KernelParams {
            config,
            store,
            transactor,
            rewarder,
            policy_table,
            observer_keys,
            genesis_context_data,
        } = params;

        let policy = policy_table
            .get(config.chain_coord)
            .cloned()
            .ok_or(KernelError::UnknownChainPolicy)?;
        let engine = RankingEngine::new(observer_keys.clone());

        let mut tx_queue = ExpireQueue::new();
        for interval in TX_EXPIRY_GROUPS {
            tx_queue.add_group(interval);
        }

        // The chain coordinate is pinned to the database on first run.
        match store.custom_data("chaincoord") {
            Some(bytes) => {
                let stored = Coordinate::from_bytes(&bytes)?;
                if stored != config.chain_coord {
                    return Err(KernelError::InvalidChainCoord);
                }
            }
            None => store.set_custom_data("chaincoord", &config.chain_coord.to_bytes())?,
        }

        let expected_genesis = genesis_hash(
            config.chain_coord,
            &policy,
            &observer_keys,
            genesis_context_data.hash(),
        );
        match store.hash(0) {
            Err(StoreError::NotExistKey) => {
                let mut custom = BTreeMap::new();
                custom.insert(
                    "consensus".to_string(),
                    engine.apply_genesis(&genesis_context_data)?,
                );
                custom.insert(
                    "reward".to_string(),
                    rewarder.apply_genesis(&genesis_context_data)?,
                );
                store.store_genesis(expected_genesis, &genesis_context_data, &custom)?;
            }
            Ok(stored) => {
                if stored != expected_genesis {
                    return Err(KernelError::InvalidGenesisHash);
                }
                let blob = store
                    .custom_data("consensus")
                    .ok_or(KernelError::NotExistConsensusSaveData)?;
                engine.load_from_save_data(&blob)?;
                let blob = store
                    .custom_data("reward")
                    .ok_or(KernelError::NotExistRewardSaveData)?;
                rewarder.load_from_save_data(&blob)?;
            }
            Err(e) => return Err(e.into()),
        }

        let kernel = Self {
            config,
            policy,
            store,
            transactor,
            engine,
            rewarder,
            observer_keys,
            tx_pool: Arc::new(TransactionPool::new()),
            tx_queue: Mutex::new(tx_queue),
            tx_working: Mutex::new(HashSet::new()),
            tx_signers: Mutex::new(HashMap::new()),
            event_handlers: RwLock::new(Vec::new()),
            process_lock: Mutex::new(()),
            close_lock: RwLock::new(()),
            is_close: AtomicBool::new(false),
            started: Instant::now(),
        };
        info!(
            height = kernel.store.height(),
            last_hash = %kernel.store.last_hash(),
            "kernel loaded"
        );
        Ok(kernel)
    }

    /// Terminate the kernel and its store.
    pub fn close(&self) {
        self.is_close.store(true, Ordering::Release);
        let _write = self.close_lock.write();
        self.store.close();
    }

    fn guard(&self) -> Result<RwLockReadGuard<'_, ()>, KernelError> {
        let guard = self.close_lock.read();
        if self.is_close.load(Ordering::Acquire) {
            return Err(KernelError::KernelClosed);
        }
        Ok(guard)
    }

    // ───────────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn policy(&self) -> &ConsensusPolicy {
        &self.policy
    }

    pub fn chain_coord(&self) -> Coordinate {
        self.config.chain_coord
    }

    pub fn version(&self) -> u16 {
        self.store.version()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn transactor(&self) -> &Arc<Transactor> {
        &self.transactor
    }

    pub fn observer_keys(&self) -> &HashSet<PublicHash> {
        &self.observer_keys
    }

    /// Observer signatures required to finalize a block.
    pub fn observer_quorum(&self) -> usize {
        self.observer_keys.len() / 2 + 2
    }

    pub fn candidate_count(&self) -> usize {
        self.engine.candidate_count()
    }

    pub fn top_rank(&self, timeout_count: u32) -> Result<Rank, KernelError> {
        Ok(self.engine.top_rank(timeout_count)?)
    }

    pub fn top_rank_in_set(
        &self,
        formulators: &HashSet<Address>,
    ) -> Result<(Rank, usize), KernelError> {
        Ok(self.engine.top_rank_in_set(formulators)?)
    }

    pub fn is_formulator(&self, address: Address, public_hash: PublicHash) -> bool {
        self.engine.is_formulator(address, public_hash)
    }

    pub fn block(&self, height: u32) -> Result<Block, KernelError> {
        Ok(self.store.data(height)?.block())
    }

    pub fn has_transaction(&self, tx_hash: Hash256) -> bool {
        self.tx_pool.is_exist(tx_hash)
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_handlers.write().push(handler);
    }

    /// Fan a diagnostic line out to every handler.
    pub fn debug_log(&self, message: &str) {
        debug!(target: "fornax_kernel", "{message}");
        for handler in self.event_handlers.read().iter() {
            handler.debug_log(self, message);
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Context construction
    // ───────────────────────────────────────────────────────────────────

    /// A fresh context over the store with this height's locked balances
    /// already released. Both generation and validation start here, so the
    /// two sides compute identical context hashes.
    pub fn new_context(&self) -> Result<Context, KernelError> {
        let loader: Arc<dyn Loader> = self.store.clone();
        let mut ctx = Context::new(loader);
        let height = ctx.target_height();
        for lb in self.store.locked_balances_by_height(height)? {
            match ctx.account_mut(lb.address) {
                Ok(account) => account.add_balance(lb.amount),
                // The owner vanished before the unlock height: the lock is
                // still cleared, the amount burns.
                Err(LedgerError::NotExistAccount) => {}
                Err(e) => return Err(e.into()),
            }
            ctx.remove_locked_balance(lb);
        }
        Ok(ctx)
    }

    fn context_by_block(&self, block: &Block) -> Result<Context, KernelError> {
        self.validate_block_body(block)?;

        let mut ctx = self.new_context()?;
        if block.header.chain_coord != ctx.chain_coord() {
            return Err(KernelError::InvalidChainCoord);
        }
        for (index, tx) in block.body.transactions.iter().enumerate() {
            self.transactor.execute(
                &mut ctx,
                tx,
                Coordinate::new(block.header.height, index as u16),
            )?;
        }
        if ctx.stack_size() > 1 {
            return Err(KernelError::DirtyContext);
        }
        if block.header.context_hash != ctx.hash() {
            return Err(KernelError::InvalidContextHash);
        }
        Ok(ctx)
    }

    /// Per-transaction signature recovery and validation, fanned out over
    /// the CPU pool, followed by the level-root recomputation.
    fn validate_block_body(&self, block: &Block) -> Result<(), KernelError> {
        if block.body.transactions.len() != block.body.transaction_signatures.len() {
            return Err(KernelError::InvalidSignatureCount);
        }
        let tx_hashes: Vec<Hash256> =
            block.body.transactions.iter().map(Transaction::hash).collect();

        let cached: HashMap<Hash256, Vec<PublicHash>> = self.tx_signers.lock().clone();
        let loader: &Store = &self.store;
        block
            .body
            .transactions
            .par_iter()
            .enumerate()
            .try_for_each(|(i, tx)| -> Result<(), KernelError> {
                let tx_hash = tx_hashes[i];
                let sigs = &block.body.transaction_signatures[i];
                let signers = match cached.get(&tx_hash) {
                    Some(signers) => signers.clone(),
                    None => sigs
                        .iter()
                        .map(|sig| recover_public_hash(tx_hash, sig))
                        .collect::<Result<Vec<_>, _>>()?,
                };
                self.transactor.validate(loader, tx, &signers)?;
                Ok(())
            })?;

        let mut level = Vec::with_capacity(tx_hashes.len() + 1);
        level.push(block.header.prev_hash);
        level.extend(tx_hashes);
        if build_level_root(&level) != block.header.level_root_hash {
            return Err(KernelError::InvalidLevelRootHash);
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────
    // Block pipeline
    // ───────────────────────────────────────────────────────────────────

    /// Cheap pre-acceptance check for untrusted inbound chain data.
    pub fn screening(&self, cd: &ChainData) -> Result<(), KernelError> {
        let _close = self.guard()?;
        if cd.header.chain_coord != self.config.chain_coord {
            return Err(KernelError::InvalidChainCoord);
        }
        if cd.signatures.len() != self.observer_quorum() + 1 {
            return Err(KernelError::InvalidSignatureCount);
        }
        let gen_sig = cd
            .generator_signature()
            .ok_or(KernelError::InvalidSignatureCount)?;
        validate_signatures_majority(
            observer_sign_hash(cd.header.hash(), gen_sig),
            cd.observer_signatures(),
            &self.observer_keys,
        )?;
        Ok(())
    }

    /// Report a fork if the alternative header carries a valid observer
    /// majority. Never mutates state.
    pub fn check_fork(&self, header: &Header, sigs: &[Signature]) -> Result<(), KernelError> {
        let _close = self.guard()?;
        if sigs.len() != self.observer_quorum() + 1 {
            return Ok(());
        }
        let Some(gen_sig) = sigs.first() else {
            return Ok(());
        };
        match validate_signatures_majority(
            observer_sign_hash(header.hash(), gen_sig),
            &sigs[1..],
            &self.observer_keys,
        ) {
            Ok(()) => Err(KernelError::ForkDetected),
            Err(_) => Ok(()),
        }
    }

    /// Validate an incoming block against the chain head and execute it.
    #[instrument(skip(self, block, generator_signature), fields(height = block.header.height))]
    pub fn validate(
        &self,
        block: &Block,
        generator_signature: &Signature,
    ) -> Result<Context, KernelError> {
        let _close = self.guard()?;
        let _lock = self.process_lock.lock();

        let height = self.store.height();
        if block.header.height != height + 1 {
            return Err(KernelError::InvalidHeight);
        }
        if block.header.height == 1 {
            if block.header.version == 0 {
                return Err(KernelError::InvalidVersion);
            }
            if block.header.prev_hash != self.store.last_hash() {
                return Err(KernelError::InvalidPrevHash);
            }
        } else {
            let last_header = self.store.header(height)?;
            if block.header.version < last_header.version {
                return Err(KernelError::InvalidVersion);
            }
            if block.header.prev_hash != last_header.hash() {
                return Err(KernelError::InvalidPrevHash);
            }
        }
        if block.header.chain_coord != self.config.chain_coord {
            return Err(KernelError::InvalidChainCoord);
        }

        let top = self.engine.top_rank(block.header.timeout_count)?;
        let pubhash = recover_public_hash(block.header.hash(), generator_signature)?;
        if top.public_hash != pubhash {
            return Err(KernelError::InvalidTopSignature);
        }
        self.context_by_block(block)
    }

    /// Commit a finalized bundle. `context` may carry the already-executed
    /// context from a prior [`Kernel::validate`]; otherwise the block is
    /// re-validated here.
    #[instrument(skip(self, cd, context), fields(height = cd.header.height))]
    pub fn process(&self, cd: ChainData, context: Option<Context>) -> Result<(), KernelError> {
        let _close = self.guard()?;
        let _lock = self.process_lock.lock();

        if cd.header.chain_coord != self.config.chain_coord {
            return Err(KernelError::InvalidChainCoord);
        }
        if cd.header.height != self.store.height() + 1 {
            return Err(KernelError::InvalidHeight);
        }
        if cd.signatures.len() != self.observer_quorum() + 1 {
            return Err(KernelError::InvalidSignatureCount);
        }
        let header_hash = cd.header.hash();
        let gen_sig = cd
            .generator_signature()
            .ok_or(KernelError::InvalidSignatureCount)?;
        let top = self.engine.top_rank(cd.header.timeout_count)?;
        let pubhash = recover_public_hash(header_hash, gen_sig)?;
        if top.public_hash != pubhash {
            return Err(KernelError::InvalidTopSignature);
        }
        validate_signatures_majority(
            observer_sign_hash(header_hash, gen_sig),
            cd.observer_signatures(),
            &self.observer_keys,
        )?;

        let block = cd.block();
        let mut ctx = match context {
            Some(ctx) => ctx,
            None => self.context_by_block(&block)?,
        };
        for handler in self.event_handlers.read().iter() {
            handler.on_process_block(self, &block, &ctx)?;
        }

        let mut custom = BTreeMap::new();
        custom.insert(
            "consensus".to_string(),
            self.engine
                .process_context(ctx.base(), header_hash, &cd.header)?,
        );
        custom.insert(
            "reward".to_string(),
            self.rewarder.process_reward(cd.header.formulator, &mut ctx)?,
        );
        let ctd = ctx.into_data();
        self.store.store_data(cd, &ctd, &custom)?;

        for handler in self.event_handlers.read().iter() {
            handler.after_process_block(self, &block);
        }

        {
            let mut queue = self.tx_queue.lock();
            let mut signers = self.tx_signers.lock();
            let mut working = self.tx_working.lock();
            for tx in &block.body.transactions {
                let tx_hash = tx.hash();
                self.tx_pool.remove(tx_hash);
                queue.remove(&tx_hash);
                signers.remove(&tx_hash);
                working.remove(&tx_hash);
            }
        }

        info!(
            height = self.store.height(),
            hash = %header_hash,
            formulator = %block.header.formulator,
            txs = block.body.transactions.len(),
            "block connected"
        );
        Ok(())
    }

    /// Assemble a candidate block from the pool into `ctx`.
    ///
    /// Pops candidates for at most the generation window (or until the
    /// per-block cap), executing accepted transactions into the context.
    /// The pool lock is held for the whole window so pushes cannot
    /// interleave.
    #[instrument(skip(self, ctx), fields(height = ctx.target_height(), timeout_count))]
    pub fn generate_block(
        &self,
        ctx: &mut Context,
        timeout_count: u32,
        timestamp: u64,
        formulator: Address,
    ) -> Result<Block, KernelError> {
        let _close = self.guard()?;
        let _lock = self.process_lock.lock();

        let mut header = Header {
            version: self.store.version(),
            height: ctx.target_height(),
            prev_hash: ctx.last_hash(),
            timestamp,
            chain_coord: self.config.chain_coord,
            formulator,
            timeout_count,
            context_hash: Hash256::ZERO,
            level_root_hash: Hash256::ZERO,
        };
        let mut body = Body::default();
        let mut tx_hashes = vec![header.prev_hash];

        let deadline = Instant::now() + self.config.generation_window;
        {
            let mut pool = self.tx_pool.lock();
            loop {
                if Instant::now() >= deadline {
                    break;
                }
                let sn = ctx.snapshot();
                let item = pool.pop(&*ctx);
                ctx.revert(sn);
                let Some(item) = item else { break };

                let index = body.transactions.len() as u16;
                if let Err(e) = self.transactor.execute(
                    ctx,
                    &item.transaction,
                    Coordinate::new(header.height, index),
                ) {
                    debug!(tx_hash = %item.tx_hash, error = %e, "transaction dropped during generation");
                    continue;
                }
                body.transactions.push(item.transaction);
                body.transaction_signatures.push(item.signatures);
                tx_hashes.push(item.tx_hash);
                if body.transactions.len() >= self.config.max_transactions_per_block {
                    break;
                }
            }
        }

        if ctx.stack_size() > 1 {
            return Err(KernelError::DirtyContext);
        }
        header.context_hash = ctx.hash();
        header.level_root_hash = build_level_root(&tx_hashes);
        Ok(Block { header, body })
    }

    // ───────────────────────────────────────────────────────────────────
    // Transaction admission
    // ───────────────────────────────────────────────────────────────────

    /// Validate a transaction and push it into the pool and expiry queue.
    #[instrument(skip(self, tx, sigs))]
    pub fn add_transaction(&self, tx: Transaction, sigs: Vec<Signature>) -> Result<(), KernelError> {
        let _close = self.guard()?;
        if self.tx_queue.lock().len() > TX_QUEUE_LIMIT {
            return Err(TxPoolError::TxQueueOverflowed.into());
        }
        let tx_hash = tx.hash();
        if !self.tx_working.lock().insert(tx_hash) {
            return Err(TxPoolError::ProcessingTransaction.into());
        }
        let result = self.add_transaction_inner(tx, sigs, tx_hash);
        self.tx_working.lock().remove(&tx_hash);
        result
    }

    fn add_transaction_inner(
        &self,
        tx: Transaction,
        sigs: Vec<Signature>,
        tx_hash: Hash256,
    ) -> Result<(), KernelError> {
        if self.tx_pool.is_exist(tx_hash) {
            return Err(TxPoolError::ExistTransaction.into());
        }
        match tx.kind() {
            TxKind::Account { from, seq } => {
                let current = self.store.seq(from);
                if seq <= current {
                    return Err(TxPoolError::PastSeq.into());
                }
                if seq > current + 100 {
                    return Err(TxPoolError::TooFarSeq.into());
                }
            }
            TxKind::Utxo { vins } => {
                for vin in vins {
                    if !self.store.is_exist_utxo(vin.id())? {
                        return Err(LedgerError::NotExistUtxo.into());
                    }
                }
            }
        }
        let signers: Vec<PublicHash> = sigs
            .iter()
            .map(|sig| recover_public_hash(tx_hash, sig))
            .collect::<Result<_, _>>()?;
        self.transactor.validate(&*self.store, &tx, &signers)?;

        for handler in self.event_handlers.read().iter() {
            handler.on_push_transaction(self, &tx, &sigs)?;
        }
        self.tx_pool.push(tx.clone(), sigs.clone())?;
        self.tx_queue.lock().push(
            tx_hash,
            TransactionMessage {
                transaction: tx.clone(),
                signatures: sigs.clone(),
            },
            self.started.elapsed(),
        );
        for handler in self.event_handlers.read().iter() {
            handler.after_push_transaction(self, &tx, &sigs);
        }
        self.tx_signers.lock().insert(tx_hash, signers);
        Ok(())
    }

    /// Advance the expiry queue: rebroadcast due transactions, evict those
    /// leaving the final group. The runner calls this on its timer.
    pub fn flush_expired(&self) {
        let Ok(_close) = self.guard() else { return };
        let expired = self.tx_queue.lock().pop_expired(self.started.elapsed());
        if expired.is_empty() {
            return;
        }
        let handlers = self.event_handlers.read();
        for item in expired {
            for handler in handlers.iter() {
                handler.do_transaction_broadcast(self, &item.value);
            }
            if item.is_last {
                warn!(tx_hash = %item.key, "transaction expired out of the pool");
                self.tx_pool.remove(item.key);
                self.tx_signers.lock().remove(&item.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_types::KeyPair;

    #[test]
    fn genesis_hash_is_deterministic_and_sensitive() {
        let coord = Coordinate::new(0, 0);
        let policy = ConsensusPolicy::default();
        let observers: HashSet<PublicHash> =
            (0..3).map(|_| KeyPair::generate().public_hash()).collect();
        let ctx_hash = double_hash(b"genesis context");

        let a = genesis_hash(coord, &policy, &observers, ctx_hash);
        let b = genesis_hash(coord, &policy, &observers, ctx_hash);
        assert_eq!(a, b);

        let mut other_policy = policy.clone();
        other_policy.pay_reward_every_blocks += 1;
        assert_ne!(a, genesis_hash(coord, &other_policy, &observers, ctx_hash));
        assert_ne!(
            a,
            genesis_hash(coord, &policy, &observers, double_hash(b"other"))
        );

        let fewer: HashSet<PublicHash> = observers.iter().take(2).cloned().collect();
        assert_ne!(a, genesis_hash(coord, &policy, &fewer, ctx_hash));
    }
}
