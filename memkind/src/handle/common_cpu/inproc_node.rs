use crate::{
    all_reduce::{reduce, Args, ReduceOp},
    args_not_support, assertion_rejected, fatal_startup, file_operation_failure, CapabilitySet,
    Communicator, MemoryKind, Messaging, NegotiationError, OptionMap, MEMORY_ALLOC_KINDS,
};
use digit_layout::types;
use log::{debug, trace};
use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    path::Path,
    slice::from_raw_parts_mut,
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, Condvar, Mutex,
    },
};

const WORLD: &str = "mpi://WORLD";
const SELF: &str = "mpi://SELF";

/// 进程内的消息传递运行时，每个参与者是一个线程。
///
/// 构造时为每个参与者配置支持的存储种类，然后由 [build](InprocWorld::build) 得到每个参与者的运行时。
#[derive(Clone, Debug)]
pub struct InprocWorld {
    ranks: Vec<RankConfig>,
}

#[derive(Clone, Debug)]
struct RankConfig {
    /// [None] 表示运行时不认识存储种类选项，会话信息中没有对应的键。
    supported: Option<CapabilitySet>,
    /// 会话信息中列出，但创建通信器时拒绝断言的种类。
    rejected: CapabilitySet,
    startup_failure: bool,
}

impl InprocWorld {
    /// `n` 个只支持 `system` 的参与者。
    pub fn new(n: usize) -> Self {
        assert!(n > 0);
        Self {
            ranks: vec![
                RankConfig {
                    supported: Some(CapabilitySet::new()),
                    rejected: CapabilitySet::new(),
                    startup_failure: false,
                };
                n
            ],
        }
    }

    pub fn supporting(mut self, rank: usize, kinds: &str) -> Self {
        self.ranks[rank].supported = Some(CapabilitySet::parse(kinds));
        self
    }

    pub fn supporting_all(mut self, kinds: &str) -> Self {
        let kinds = CapabilitySet::parse(kinds);
        for rank in &mut self.ranks {
            rank.supported = Some(kinds.clone())
        }
        self
    }

    pub fn without_alloc_kinds(mut self, rank: usize) -> Self {
        self.ranks[rank].supported = None;
        self
    }

    pub fn rejecting(mut self, rank: usize, kinds: &str) -> Self {
        self.ranks[rank].rejected = CapabilitySet::parse(kinds);
        self
    }

    pub fn failing_startup(mut self, rank: usize) -> Self {
        self.ranks[rank].startup_failure = true;
        self
    }

    pub fn build(self) -> Vec<InprocRuntime> {
        let shared = Arc::new(Shared {
            size: self.ranks.len(),
            creations: Default::default(),
        });
        self.ranks
            .into_iter()
            .enumerate()
            .map(|(rank, config)| InprocRuntime {
                rank,
                config,
                shared: shared.clone(),
                sequence: Default::default(),
            })
            .collect()
    }
}

/// 一个参与者持有的运行时。
pub struct InprocRuntime {
    rank: usize,
    config: RankConfig,
    shared: Arc<Shared>,
    sequence: Mutex<HashMap<String, usize>>,
}

struct Shared {
    size: usize,
    creations: Mutex<HashMap<String, Arc<Creation>>>,
}

pub struct InprocSession {
    provided: Option<CapabilitySet>,
}

#[derive(Clone, Debug)]
pub struct InprocGroup {
    pset: String,
    members: Vec<usize>,
    provided: Option<CapabilitySet>,
}

pub struct InprocComm {
    node: InprocNode<Message>,
    kind: MemoryKind,
    provided: Option<CapabilitySet>,
}

impl InprocRuntime {
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.shared.size
    }

    fn next_key(&self, scope: &str, tag: &str) -> String {
        let name = format!("{scope}/{tag}");
        let mut sequence = self.sequence.lock().unwrap();
        let seq = sequence.entry(name.clone()).or_default();
        *seq += 1;
        format!("{name}#{seq}")
    }
}

impl InprocGroup {
    #[inline]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    fn local_rank(&self, rank: usize) -> Option<usize> {
        self.members.iter().position(|&r| r == rank)
    }
}

impl InprocComm {
    #[inline]
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    fn barrier(&self) -> Result<(), NegotiationError> {
        let mut token = [0u8];
        self.all_reduce(&Args {
            base: token.as_mut_ptr(),
            len: 1,
            dt: types::U8,
            op: ReduceOp::Sum,
        })
    }
}

fn provides(provided: &Option<CapabilitySet>, kind: &MemoryKind) -> bool {
    match provided {
        Some(provided) => provided.supports(kind),
        None => kind.is_system(),
    }
}

impl Messaging for InprocRuntime {
    type Session = InprocSession;
    type Group = InprocGroup;
    type Comm = InprocComm;

    fn session_init(&self, info: &OptionMap) -> Result<InprocSession, NegotiationError> {
        if self.config.startup_failure {
            return Err(fatal_startup(format!("rank {} failed to start", self.rank)));
        }
        let requested = match info.get(MEMORY_ALLOC_KINDS) {
            Some(value) => CapabilitySet::parse(value),
            None => std::iter::once(MemoryKind::SYSTEM).collect(),
        };
        let provided = self
            .config
            .supported
            .as_ref()
            .map(|supported| requested.intersect(supported));
        debug!(
            "rank {} session: requested {requested}, provided {:?}",
            self.rank,
            provided.as_ref().map(ToString::to_string)
        );
        Ok(InprocSession { provided })
    }

    fn session_info(&self, session: &InprocSession) -> OptionMap {
        let mut info = OptionMap::new();
        if let Some(provided) = &session.provided {
            info.set(MEMORY_ALLOC_KINDS, provided.to_string())
        }
        info
    }

    fn group_from_pset(
        &self,
        session: &InprocSession,
        pset: &str,
    ) -> Result<InprocGroup, NegotiationError> {
        let members = if pset.eq_ignore_ascii_case(WORLD) {
            (0..self.shared.size).collect()
        } else if pset.eq_ignore_ascii_case(SELF) {
            vec![self.rank]
        } else {
            return Err(args_not_support(format!("unknown process set {pset}")));
        };
        Ok(InprocGroup {
            pset: pset.to_string(),
            members,
            provided: session.provided.clone(),
        })
    }

    fn comm_create_from_group(
        &self,
        group: &InprocGroup,
        tag: &str,
        info: &OptionMap,
    ) -> Result<InprocComm, NegotiationError> {
        let Some(local) = group.local_rank(self.rank) else {
            return Err(args_not_support(format!(
                "rank {} is not a member of {}",
                self.rank, group.pset
            )));
        };
        let kind = info
            .asserted_kind()
            .ok()
            .filter(|kind| provides(&group.provided, kind))
            .filter(|kind| !self.config.rejected.contains(kind));

        let scope = if group.size() == 1 {
            format!("{}@{}", group.pset, self.rank)
        } else {
            group.pset.clone()
        };
        let key = self.next_key(&scope, tag);
        let creation = self
            .shared
            .creations
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Creation::new(group.size())))
            .clone();

        let Vote { agreed, node, last } = creation.vote(local, kind.is_some());
        if last {
            self.shared.creations.lock().unwrap().remove(&key);
        }
        trace!("rank {} voted {kind:?} on {key}", self.rank);

        match (agreed, kind, node) {
            (true, Some(kind), Some(node)) => Ok(InprocComm {
                node,
                kind,
                provided: group.provided.clone(),
            }),
            _ => Err(assertion_rejected(format!(
                "{tag}: {:?} not honored by every participant",
                info.get(crate::ASSERT_MEMORY_ALLOC_KINDS).unwrap_or("system")
            ))),
        }
    }

    fn session_finalize(&self, session: InprocSession) -> Result<(), NegotiationError> {
        debug!("rank {} session finalized", self.rank);
        drop(session);
        Ok(())
    }
}

impl Communicator for InprocComm {
    #[inline]
    fn rank(&self) -> usize {
        self.node.rank
    }

    #[inline]
    fn group_size(&self) -> usize {
        self.node.senders.len()
    }

    fn all_reduce(&self, args: &Args) -> Result<(), NegotiationError> {
        let size = args.size();
        let buf = unsafe { from_raw_parts_mut(args.base, size) };
        let rank = self.rank();
        let group_size = self.group_size();

        let result = if rank == 0 {
            let mut parts = vec![None; group_size];
            for _ in 1..group_size {
                match self.node.recv() {
                    Message::Contribution { rank, data } => parts[rank] = Some(data),
                    Message::Reduced(_) => unreachable!(),
                }
            }
            let mut acc = buf.to_vec();
            let result = parts
                .into_iter()
                .flatten()
                .try_for_each(|data| reduce(args.dt, args.op, &mut acc, &data))
                .map(|()| acc);
            for i in 1..group_size {
                self.node.send(i, Message::Reduced(result.clone()))
            }
            result
        } else {
            self.node.send(
                0,
                Message::Contribution {
                    rank,
                    data: buf.to_vec(),
                },
            );
            match self.node.recv() {
                Message::Reduced(result) => result,
                Message::Contribution { .. } => unreachable!(),
            }
        };
        let result = result?;

        if result.len() != size {
            return Err(args_not_support(format!(
                "rank {rank} contributed {size} bytes, reduced {} bytes",
                result.len()
            )));
        }
        buf.copy_from_slice(&result);
        Ok(())
    }

    fn file_open(&self, path: &Path, info: &OptionMap) -> Result<File, NegotiationError> {
        let kind = info
            .asserted_kind()
            .map_err(|value| assertion_rejected(format!("malformed assertion {value:?}")))?;
        if !provides(&self.provided, &kind) {
            return Err(assertion_rejected(format!(
                "{kind} not provided for file operations"
            )));
        }
        debug!("open {} asserting {kind}", path.display());
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| file_operation_failure(format!("{}: {e}", path.display())))
    }

    fn disconnect(self) -> Result<(), NegotiationError> {
        self.barrier()
    }
}

enum Message {
    Contribution { rank: usize, data: Vec<u8> },
    Reduced(Result<Vec<u8>, NegotiationError>),
}

struct InprocNode<T> {
    rank: usize,
    senders: Box<[Sender<T>]>,
    receiver: Receiver<T>,
}

impl<T> InprocNode<T> {
    fn new(n: usize) -> Vec<Self> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..n).map(|_| channel()).unzip();
        let senders: Box<[Sender<T>]> = senders.into();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Self {
                rank,
                senders: senders.clone(),
                receiver,
            })
            .collect()
    }

    #[inline]
    fn send(&self, i: usize, msg: T) {
        self.senders[i].send(msg).unwrap();
    }

    #[inline]
    fn recv(&self) -> T {
        self.receiver.recv().unwrap()
    }
}

/// 创建通信器时的集合表决。
struct Creation {
    state: Mutex<Ballot>,
    cond: Condvar,
}

struct Ballot {
    votes: Vec<Option<bool>>,
    nodes: Vec<Option<InprocNode<Message>>>,
    departed: usize,
}

struct Vote {
    agreed: bool,
    node: Option<InprocNode<Message>>,
    last: bool,
}

impl Creation {
    fn new(n: usize) -> Self {
        Self {
            state: Mutex::new(Ballot {
                votes: vec![None; n],
                nodes: InprocNode::new(n).into_iter().map(Some).collect(),
                departed: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn vote(&self, local: usize, ok: bool) -> Vote {
        let mut ballot = self.state.lock().unwrap();
        ballot.votes[local] = Some(ok);
        self.cond.notify_all();
        let mut ballot = self
            .cond
            .wait_while(ballot, |b| b.votes.iter().any(Option::is_none))
            .unwrap();

        let agreed = ballot.votes.iter().all(|v| *v == Some(true));
        let node = ballot.nodes[local].take();
        ballot.departed += 1;
        Vote {
            agreed,
            node,
            last: ballot.departed == ballot.votes.len(),
        }
    }
}
