//! # Chain manager
//!
//! [`ChainCore`] owns the block index tree, the block file store, the
//! index store, the orphan pool, and the best-chain tip — and it owns the
//! only mutable paths into them. One process-wide chain mutex (a
//! `parking_lot::RwLock`) serializes acceptance and reorganization;
//! read-only queries take it in shared mode.
//!
//! ## Acceptance pipeline
//!
//! ```text
//! process_block
//!   ├── stateless checks              (no lock held)
//!   ├── duplicate?      -> Duplicate  (idempotent success)
//!   ├── parent unknown? -> orphan pool, ask source for the root
//!   └── accept
//!         ├── contextual checks
//!         ├── block file append + fsync
//!         ├── tree insert
//!         ├── set_best when strictly more trust (reorg if needed)
//!         └── one atomic index batch
//!   then: cascade waiting orphans to fixed point
//! ```
//!
//! The fsync-before-commit ordering means a crash can leave an appended
//! block unreferenced (harmless garbage at a file tail) but never an
//! index entry pointing at missing bytes.
//!
//! ## Failure containment
//!
//! Consensus failures reject one block. Storage failures (`DiskFull`,
//! `DiskCorrupt`, `IndexCorrupt`, `Internal`) poison the core: every
//! subsequent acceptance is refused until the operator intervenes. A
//! connect failure mid-reorg unwinds to the previous tip and marks the
//! offending block's index entry failed so the fork cannot be retried.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::block::{Block, Channel};
use crate::chain::locator::BlockLocator;
use crate::chain::orphan::OrphanPool;
use crate::collab::{BlockRequester, Source, TxLedger};
use crate::config::{
    proof_of_stake_reward, proof_of_work_reward, ChainParams, COINBASE_MATURITY,
    ORPHAN_POOL_MAX_BLOCKS, ORPHAN_POOL_MAX_BYTES, RESERVE_PER_BLOCK,
};
use crate::crypto::hash::BlockHash;
use crate::error::{ChainError, Result};
use crate::index::{flags, BlockIndex, BlockIndexTree, DiskBlockIndex};
use crate::store::{BlockFileStore, IndexBatch, IndexStore};
use crate::validate::{check_block, check_context, checkpoint, expected_bits};

/// Success-path outcomes of [`ChainCore::process_block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accepted {
    /// The block extended (or reorganized onto) the main chain.
    Connected,
    /// Stored and indexed, but the main chain kept more trust.
    SideChain,
    /// Parent unknown; parked in the orphan pool pending ancestors.
    Orphan,
    /// Already known; nothing changed.
    Duplicate,
}

/// Snapshot of the best-chain head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TipInfo {
    pub hash: BlockHash,
    pub height: u32,
    pub chain_trust: u64,
    pub time: u32,
    pub supply: i64,
}

struct CoreState {
    tree: BlockIndexTree,
    files: BlockFileStore,
    index: IndexStore,
    orphans: OrphanPool,
    tip: BlockHash,
    genesis: BlockHash,
    hardened: Vec<(u32, BlockHash)>,
}

/// The block and chain-state core. One value per data directory; thread
/// it to collaborators by `Arc`.
pub struct ChainCore {
    params: ChainParams,
    ledger: Arc<dyn TxLedger>,
    requester: Option<Arc<dyn BlockRequester>>,
    state: RwLock<CoreState>,
    shutdown: AtomicBool,
    poisoned: AtomicBool,
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

impl ChainCore {
    /// Open (or create) the chain under `data_dir`.
    ///
    /// An empty index store gets the deterministic genesis block written
    /// through the full acceptance path's storage steps; a populated one
    /// is reloaded node by node, each record re-hashed against its key.
    pub fn open(
        data_dir: &Path,
        params: ChainParams,
        ledger: Arc<dyn TxLedger>,
        requester: Option<Arc<dyn BlockRequester>>,
    ) -> Result<ChainCore> {
        let mut files = BlockFileStore::open(&data_dir.join("blocks"), params.magic)?;
        let index = IndexStore::open(&data_dir.join("index"))?;

        let mut tree = BlockIndexTree::new();
        let (tip, genesis) = match index.genesis_hash()? {
            None => Self::create_genesis(&params, &mut files, &index, &mut tree)?,
            Some(genesis) => {
                let tip = Self::load_tree(&index, &mut tree)?;
                info!(
                    blocks = tree.len(),
                    tip = %tip.short(),
                    "block index loaded"
                );
                (tip, genesis)
            }
        };

        // Hardened checkpoints: the store remembers every pair it has seen;
        // parameters may introduce new ones on upgrade.
        let mut hardened = index.checkpoints()?;
        let mut batch = IndexBatch::new();
        let mut added = false;
        for (height, hash) in &params.checkpoints {
            if !hardened.iter().any(|(h, _)| h == height) {
                batch.put_checkpoint(*height, hash);
                hardened.push((*height, *hash));
                added = true;
            }
        }
        if added {
            index.commit(batch)?;
        }
        hardened.sort_by_key(|(h, _)| *h);

        Ok(ChainCore {
            params,
            ledger,
            requester,
            state: RwLock::new(CoreState {
                tree,
                files,
                index,
                orphans: OrphanPool::new(ORPHAN_POOL_MAX_BLOCKS, ORPHAN_POOL_MAX_BYTES),
                tip,
                genesis,
                hardened,
            }),
            shutdown: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
        })
    }

    fn create_genesis(
        params: &ChainParams,
        files: &mut BlockFileStore,
        index: &IndexStore,
        tree: &mut BlockIndexTree,
    ) -> Result<(BlockHash, BlockHash)> {
        let genesis = Block::genesis(params);
        let hash = genesis.hash();

        let (file, offset) = files.append(&genesis)?;
        files.sync()?;
        tree.insert(&genesis.header, file, offset)?;

        let mut batch = IndexBatch::new();
        let node = tree.get(&hash).expect("genesis was just inserted");
        batch.put_index(&hash, &DiskBlockIndex::from_index(node));
        batch.put_genesis(&hash);
        batch.put_best(&hash);
        index.commit(batch)?;

        info!(genesis = %hash.short(), "created new chain");
        Ok((hash, hash))
    }

    fn load_tree(index: &IndexStore, tree: &mut BlockIndexTree) -> Result<BlockHash> {
        for entry in index.iter_indexes() {
            let (hash, record) = entry?;
            let node = record.into_index();
            if node.hash != hash {
                return Err(ChainError::IndexCorrupt(format!(
                    "record keyed {} re-hashes to {}",
                    hash.short(),
                    node.hash.short()
                )));
            }
            tree.insert_loaded(node);
        }

        let tip = index
            .best_hash()?
            .ok_or_else(|| ChainError::IndexCorrupt("index has blocks but no best hash".into()))?;
        if !tree.contains(&tip) {
            return Err(ChainError::IndexCorrupt(format!(
                "best hash {} is not in the index",
                tip.short()
            )));
        }
        // Parent linkage must close: every non-genesis node's parent is
        // present.
        for node in tree.iter() {
            if let Some(prev) = &node.prev {
                if !tree.contains(prev) {
                    return Err(ChainError::IndexCorrupt(format!(
                        "node {} references missing parent {}",
                        node.hash.short(),
                        prev.short()
                    )));
                }
            }
        }
        Ok(tip)
    }

    // -- Entry point --------------------------------------------------------

    /// Process a block arriving from any source.
    ///
    /// Resubmitting a known block is a silent success (`Duplicate`). A
    /// block with an unknown parent parks as `Orphan` and, when it came
    /// from a peer, the source is asked for the orphan chain's root.
    pub fn process_block(&self, source: Source, block: Block) -> Result<Accepted> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(ChainError::Shutdown);
        }
        if self.poisoned.load(Ordering::Relaxed) {
            return Err(ChainError::Internal(
                "chain core poisoned by an earlier fatal error".into(),
            ));
        }

        check_block(&block, self.ledger.as_ref(), unix_now())?;

        let mut state = self.state.write();
        let hash = block.hash();

        if state.tree.contains(&hash) || state.orphans.contains(&hash) {
            debug!(block = %hash.short(), "duplicate block");
            return Ok(Accepted::Duplicate);
        }

        if block.is_genesis() {
            return if hash == state.genesis {
                Ok(Accepted::Duplicate)
            } else {
                Err(ChainError::InvalidContext("foreign genesis block".into()))
            };
        }

        if !state.tree.contains(&block.header.prev_hash) {
            state.orphans.insert(block.clone());
            let wanted = state
                .orphans
                .wanted_by_orphan(&hash)
                .unwrap_or(block.header.prev_hash);
            info!(
                block = %hash.short(),
                missing = %wanted.short(),
                orphans = state.orphans.len(),
                "parent unknown, block parked as orphan"
            );
            if let (Source::Peer(peer), Some(requester)) = (source, &self.requester) {
                requester.ask_for_block(peer, wanted);
            }
            return Ok(Accepted::Orphan);
        }

        let result = match self.accept(&mut state, &block) {
            Ok(result) => result,
            Err(e) => return Err(self.note_fatal(e)),
        };

        // Attach waiting orphans, repeating to fixed point.
        let mut parents = vec![hash];
        while let Some(parent) = parents.pop() {
            for orphan in state.orphans.take_children(&parent) {
                let orphan_hash = orphan.hash();
                match self.accept(&mut state, &orphan) {
                    Ok(outcome) => {
                        debug!(block = %orphan_hash.short(), ?outcome, "orphan attached");
                        parents.push(orphan_hash);
                    }
                    Err(e) if e.is_fatal() => return Err(self.note_fatal(e)),
                    Err(e) => {
                        warn!(block = %orphan_hash.short(), error = %e, "queued orphan rejected");
                    }
                }
            }
        }

        Ok(result)
    }

    // -- Acceptance ---------------------------------------------------------

    /// Accept a block whose parent is in the tree. Caller holds the write
    /// lock and has run the stateless checks.
    fn accept(&self, state: &mut CoreState, block: &Block) -> Result<Accepted> {
        let parent = state
            .tree
            .get(&block.header.prev_hash)
            .ok_or_else(|| ChainError::MissingParent(block.header.prev_hash.short()))?;

        let pending =
            check_context(block, parent, &state.tree, &self.params, &state.hardened)?;

        // Persist the raw block and make it durable before any index
        // write can reference it.
        let (file, offset) = state.files.append(block)?;
        state.files.sync()?;

        let hash = state.tree.insert(&block.header, file, offset)?;
        let node = state.tree.get_mut(&hash).expect("block was just inserted");
        node.pending_checkpoint = pending;
        let new_trust = node.chain_trust;
        let tip_trust = state
            .tree
            .get(&state.tip)
            .map(|t| t.chain_trust)
            .unwrap_or(0);

        let mut batch = IndexBatch::new();
        // Strictly-greater keeps first-seen as the tie winner.
        let outcome = if new_trust > tip_trust {
            match self.set_best(state, hash, &mut batch) {
                Ok(()) => Accepted::Connected,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // The blocks stay on disk but off the main chain; the
                    // failed node poisons its own fork only.
                    let node = state.tree.get_mut(&hash).expect("block was just inserted");
                    node.flags |= flags::FAILED;
                    let mut failed_batch = IndexBatch::new();
                    failed_batch.put_index(&hash, &DiskBlockIndex::from_index(node));
                    state.index.commit(failed_batch)?;
                    return Err(e);
                }
            }
        } else {
            Accepted::SideChain
        };

        let node = state.tree.get(&hash).expect("block was just inserted");
        batch.put_index(&hash, &DiskBlockIndex::from_index(node));
        state.index.commit(batch)?;

        match outcome {
            Accepted::Connected => info!(
                block = %hash.short(),
                height = block.header.height,
                channel = block.header.channel,
                trust = new_trust,
                "new best chain"
            ),
            _ => info!(
                block = %hash.short(),
                height = block.header.height,
                "accepted on side chain"
            ),
        }
        Ok(outcome)
    }

    /// Elect `new_tip` as the best chain, reorganizing when it does not
    /// extend the current tip. On a non-fatal failure every coin update is
    /// unwound, the previous tip stays, and nothing from `batch` commits.
    fn set_best(
        &self,
        state: &mut CoreState,
        new_tip: BlockHash,
        batch: &mut IndexBatch,
    ) -> Result<()> {
        let old_tip = state.tip;
        let fork = state
            .tree
            .lowest_common_ancestor(&old_tip, &new_tip)
            .ok_or_else(|| ChainError::Internal("tips share no ancestor".into()))?;

        // Reorg depth guard: never fork below the tip's pending checkpoint.
        let fork_height = state.tree.get(&fork).map(|n| n.height).unwrap_or(0);
        let tip_pending = state
            .tree
            .get(&old_tip)
            .map(|n| n.pending_checkpoint)
            .unwrap_or((0, BlockHash::ZERO));
        if !checkpoint::fork_allowed(fork_height, tip_pending) {
            return Err(ChainError::InvalidContext(format!(
                "reorganization forks at {fork_height}, below pending checkpoint {}",
                tip_pending.0
            )));
        }

        let disconnect = state.tree.path_down_to(&old_tip, &fork)?; // tip-first
        let mut connect = state.tree.path_down_to(&new_tip, &fork)?;
        connect.reverse(); // bottom-up

        if !disconnect.is_empty() {
            info!(
                from = %old_tip.short(),
                to = %new_tip.short(),
                fork_height,
                disconnecting = disconnect.len(),
                connecting = connect.len(),
                "chain reorganization"
            );
        }

        // Phase 1: reverse the losing branch's coin updates, tip-first.
        let mut disconnected: Vec<(BlockHash, Block)> = Vec::with_capacity(disconnect.len());
        for hash in &disconnect {
            let block = self.read_node_block(state, hash)?;
            self.disconnect_block(&block)?;
            disconnected.push((*hash, block));
        }

        // Phase 2: apply the winning branch bottom-up; unwind everything
        // on the first failure.
        let mut connected: Vec<Block> = Vec::with_capacity(connect.len());
        for hash in &connect {
            let block = self.read_node_block(state, hash)?;
            match self.connect_block(state, hash, &block) {
                Ok(()) => connected.push(block),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(block = %hash.short(), error = %e, "connect failed, unwinding reorganization");
                    for done in connected.iter().rev() {
                        self.disconnect_block(done)?;
                    }
                    for (_, undone) in disconnected.iter().rev() {
                        self.reconnect_unwound(state, undone)?;
                    }
                    // Blame lands on the block that failed to connect.
                    if let Some(node) = state.tree.get_mut(hash) {
                        node.flags |= flags::FAILED;
                    }
                    return Err(e);
                }
            }
        }

        // Phase 3: re-point the main-chain path.
        for hash in &disconnect {
            if let Some(node) = state.tree.get_mut(hash) {
                node.next = None;
            }
        }
        if let Some(node) = state.tree.get_mut(&fork) {
            node.next = connect.first().copied();
        }
        for pair in connect.windows(2) {
            if let Some(node) = state.tree.get_mut(&pair[0]) {
                node.next = Some(pair[1]);
            }
        }
        if let Some(node) = state.tree.get_mut(&new_tip) {
            node.next = None;
        }

        // Phase 4: stage every touched record plus the new best hash.
        for hash in disconnect.iter().chain(std::iter::once(&fork)).chain(connect.iter()) {
            if let Some(node) = state.tree.get(hash) {
                batch.put_index(hash, &DiskBlockIndex::from_index(node));
            }
        }
        batch.put_best(&new_tip);
        state.tip = new_tip;
        Ok(())
    }

    fn read_node_block(&self, state: &mut CoreState, hash: &BlockHash) -> Result<Block> {
        let (file, offset) = {
            let node = state
                .tree
                .get(hash)
                .ok_or_else(|| ChainError::Internal(format!("no index for {}", hash.short())))?;
            (node.file, node.offset)
        };
        let block = state.files.read(file, offset, true)?;
        if block.hash() != *hash {
            return Err(ChainError::DiskCorrupt(format!(
                "block at {file}:{offset} re-hashes to {}, index says {}",
                block.hash().short(),
                hash.short()
            )));
        }
        Ok(block)
    }

    /// Apply one block's coin updates and fold its monetary rollups into
    /// the index node.
    fn connect_block(&self, state: &mut CoreState, hash: &BlockHash, block: &Block) -> Result<()> {
        let channel = block.channel()?;
        let height = block.header.height;

        // The coinbase may claim at most the schedule's due.
        if height > 0 {
            let claimed = block.vtx[0].total_out();
            let cap = match channel {
                Channel::Stake => proof_of_stake_reward(block.header.nonce as i64 / 86_400),
                pow => proof_of_work_reward(block.header.bits)
                    .saturating_add(RESERVE_PER_BLOCK[pow.as_usize()]),
            };
            if claimed > cap {
                return Err(ChainError::InvalidContext(format!(
                    "coinbase claims {claimed}, schedule allows {cap}"
                )));
            }
        }

        // Coin updates, coinbase first; unwind this block's own partial
        // work if any transaction refuses.
        let mut applied = 0;
        for tx in &block.vtx {
            match self.ledger.connect_inputs(tx, height, COINBASE_MATURITY) {
                Ok(()) => applied += 1,
                Err(e) => {
                    for tx in block.vtx[..applied].iter().rev() {
                        self.ledger.disconnect_inputs(tx).map_err(|e2| {
                            ChainError::Internal(format!("unwind failed after {e}: {e2}"))
                        })?;
                    }
                    return Err(e);
                }
            }
        }

        // Monetary rollups, recomputed from the parent on every connect so
        // a block that leaves and re-enters the main chain never double
        // counts itself.
        let parent = state.tree.get(&block.header.prev_hash);
        let parent_supply = parent.map(|p| p.supply).unwrap_or(0);
        let parent_rewards = parent
            .map(|p| p.coinbase_rewards)
            .unwrap_or([0; crate::config::CHANNEL_COUNT]);
        let parent_reserve = parent
            .map(|p| p.released_reserve)
            .unwrap_or([0; crate::config::RESERVE_SLOTS]);
        let mint = block.vtx[0].total_out();
        if let Some(node) = state.tree.get_mut(hash) {
            let ch = channel.as_usize();
            node.mint = mint;
            node.supply = parent_supply.saturating_add(mint);
            node.coinbase_rewards = parent_rewards;
            node.coinbase_rewards[ch] = node.coinbase_rewards[ch].saturating_add(mint);
            node.released_reserve = parent_reserve;
            node.released_reserve[ch] =
                node.released_reserve[ch].saturating_add(RESERVE_PER_BLOCK[ch]);
        }
        Ok(())
    }

    /// Reverse one block's coin updates, transactions in reverse order.
    /// A failure here means state the core itself connected cannot be
    /// reversed: an invariant violation.
    fn disconnect_block(&self, block: &Block) -> Result<()> {
        for tx in block.vtx.iter().rev() {
            self.ledger
                .disconnect_inputs(tx)
                .map_err(|e| ChainError::Internal(format!("disconnect failed: {e}")))?;
        }
        Ok(())
    }

    /// Re-apply a block that phase 1 disconnected, during unwind. It was
    /// connected before, so refusal is an invariant violation.
    fn reconnect_unwound(&self, state: &mut CoreState, block: &Block) -> Result<()> {
        let hash = block.hash();
        self.connect_block(state, &hash, block)
            .map_err(|e| ChainError::Internal(format!("reconnect during unwind failed: {e}")))
    }

    fn note_fatal(&self, e: ChainError) -> ChainError {
        if e.is_fatal() {
            warn!(error = %e, "fatal chain error, refusing further acceptance");
            self.poisoned.store(true, Ordering::Relaxed);
        }
        e
    }

    // -- Queries (shared lock) ----------------------------------------------

    /// Snapshot of the current best-chain head.
    pub fn tip(&self) -> TipInfo {
        let state = self.state.read();
        let node = state.tree.get(&state.tip).expect("tip is always indexed");
        TipInfo {
            hash: node.hash,
            height: node.height,
            chain_trust: node.chain_trust,
            time: node.time,
            supply: node.supply,
        }
    }

    pub fn genesis_hash(&self) -> BlockHash {
        self.state.read().genesis
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Clone of the index node for `hash`, if known.
    pub fn lookup(&self, hash: &BlockHash) -> Option<BlockIndex> {
        self.state.read().tree.get(hash).cloned()
    }

    /// Locator for the current tip.
    pub fn locator(&self) -> BlockLocator {
        let state = self.state.read();
        let tip = state.tree.get(&state.tip).expect("tip is always indexed");
        BlockLocator::new(&state.tree, tip)
    }

    /// Locator starting at an arbitrary known block.
    pub fn locator_for(&self, hash: &BlockHash) -> Option<BlockLocator> {
        let state = self.state.read();
        let node = state.tree.get(hash)?;
        Some(BlockLocator::new(&state.tree, node))
    }

    /// Resolve a peer's locator against our tree: the first hash we know.
    pub fn resolve_locator(&self, locator: &BlockLocator) -> Option<BlockIndex> {
        let state = self.state.read();
        locator.resolve(&state.tree).cloned()
    }

    /// Height of the tip's most recent ancestor on `channel` (0 when the
    /// channel has no blocks yet), counted along that channel.
    pub fn channel_height(&self, channel: Channel) -> u32 {
        let state = self.state.read();
        let tip = state.tree.get(&state.tip).expect("tip is always indexed");
        state
            .tree
            .last_of_channel(tip, channel)
            .map(|n| n.channel_height)
            .unwrap_or(0)
    }

    /// Most recent block of the given kind at or below the tip.
    pub fn last_of_kind(&self, proof_of_stake: bool) -> Option<BlockIndex> {
        let state = self.state.read();
        let tip = state.tree.get(&state.tip)?;
        state.tree.last_of_kind(tip, proof_of_stake).cloned()
    }

    /// Most recent block on `channel` at or below the tip.
    pub fn last_of_channel(&self, channel: Channel) -> Option<BlockIndex> {
        let state = self.state.read();
        let tip = state.tree.get(&state.tip)?;
        state.tree.last_of_channel(tip, channel).cloned()
    }

    /// The compact difficulty the next block on `channel` must claim.
    pub fn expected_difficulty(&self, channel: Channel) -> u32 {
        let state = self.state.read();
        let tip = state.tree.get(&state.tip).expect("tip is always indexed");
        expected_bits(&state.tree, tip, channel, &self.params)
    }

    /// Median time past of the tip, for builder clock rules.
    pub fn tip_median_time_past(&self) -> u32 {
        let state = self.state.read();
        let tip = state.tree.get(&state.tip).expect("tip is always indexed");
        state.tree.median_time_past(tip)
    }

    /// True while the tip is far enough behind wall clock that this node
    /// is clearly still catching up.
    pub fn is_initial_download(&self) -> bool {
        let tip_time = self.tip().time as u64;
        let lag = self.params.initial_download_lag as u64;
        (tip_time + lag) < unix_now() as u64
    }

    /// Read a block back from the block files by hash.
    pub fn read_block(&self, hash: &BlockHash) -> Result<Block> {
        let mut state = self.state.write();
        let state = &mut *state;
        self.read_node_block(state, hash)
    }

    pub fn block_count(&self) -> usize {
        self.state.read().tree.len()
    }

    pub fn orphan_count(&self) -> usize {
        self.state.read().orphans.len()
    }

    // -- Shutdown -----------------------------------------------------------

    /// Set the process-wide shutdown flag. In-flight acceptance finishes;
    /// new submissions get [`ChainError::Shutdown`].
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        info!("chain core shutdown requested");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
