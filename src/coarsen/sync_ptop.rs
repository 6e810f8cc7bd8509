//! Synchronous point-to-point negotiation of cross-process mates.
//!
//! One call is one pass: a request round where every process tells the owners
//! of the ghosts it wants to mate with, then a reply round where requests are
//! answered. A request is a `(requester, target)` pair of global numbers; a
//! reply carries the requester and the target's mate, so that the requester
//! knows it won when the mate is the target itself. A target left as a
//! singleton answers `-1`.

use log::trace;

use super::Multinode;
use super::matching::{Mate, MatchingState, creator_of};
use crate::algs::communicator::{CommTag, Communicator, Test, Wait, wait_all, wait_any};
use crate::algs::wire::{WireMatePair, decode_records, encode_records};
use crate::config::Context;
use crate::dgraph::{DistGraph, agree};
use crate::graph::Gnum;
use crate::graph_error::{CommResultExt, DgraphError, WireResultExt, try_with_capacity};

const OP: &str = "match_sync_ptop";

/// Outcome counts of one pass on this process.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    /// Cross pairs settled on this process (either side).
    pub matched: usize,
    /// Our requests answered with another mate.
    pub refused: usize,
}

/// Mate reported to a refused requester.
fn refusal(target: Gnum, mate: Gnum) -> Gnum {
    if mate == target { -1 } else { mate }
}

/// Reply slot of an incoming request.
enum Answer {
    Now(Gnum),
    /// Target was pending towards someone else; decided after all requests are in.
    Deferred(usize),
}

/// Receive one message per neighbour, in completion order or, when
/// deterministic, in descending neighbour order. `f` gets the neighbour index.
///
/// A failure of `f` does not stop the draining: every expected message is
/// still received, and the first failure is returned at the end.
fn drain<H, F>(
    recvs: &mut [Option<H>],
    deterministic: bool,
    site: u32,
    mut f: F,
) -> Result<(), DgraphError>
where
    H: Test + Wait,
    F: FnMut(usize, Vec<u8>) -> Result<(), DgraphError>,
{
    let mut handled = Ok(());
    if deterministic {
        for i in (0..recvs.len()).rev() {
            if let Some(h) = recvs[i].take() {
                let data = h.wait().at(OP, site)?;
                if handled.is_ok() {
                    handled = f(i, data);
                }
            }
        }
    } else {
        while let Some((i, data)) = wait_any(recvs).at(OP, site)? {
            if handled.is_ok() {
                handled = f(i, data);
            }
        }
    }
    handled
}

/// Requests of the queued `Pending` vertices, bucketed per neighbour; each
/// local vertex sends at most one.
fn bucket_requests<C: Communicator>(
    graph: &DistGraph<C>,
    st: &MatchingState,
) -> Result<Vec<Vec<WireMatePair>>, DgraphError> {
    let ghost = graph.ghost();
    let nn = ghost.neighbors().len();
    let mut requests: Vec<Vec<WireMatePair>> = Vec::with_capacity(nn);
    for i in 0..nn {
        requests.push(try_with_capacity("match request buffer", ghost.send_list(i).len())?);
    }
    for &v in &st.queue {
        if let Mate::Pending(e) = st.mates[v] {
            let gst = graph.edge_gst(e);
            if gst < graph.vertex_count() {
                return Err(DgraphError::internal(OP, 1));
            }
            let i = ghost
                .neighbor_index(graph.ghost_owner(gst))
                .ok_or_else(|| DgraphError::internal(OP, 2))?;
            requests[i].push(WireMatePair::new(graph.global_of(v), graph.edges[e]));
        }
    }
    Ok(requests)
}

/// Collective: negotiate every `Pending` vertex of `st` with the
/// neighbourhood. Requests left unanswered stay `Pending` for the caller to
/// reset. A local failure in either round fails the pass on every process.
pub fn sync_ptop<C: Communicator>(
    graph: &DistGraph<C>,
    st: &mut MatchingState,
    ctx: &Context,
) -> Result<PassStats, DgraphError> {
    let comm = graph.comm();
    let ghost = graph.ghost();
    let nbrs = ghost.neighbors();
    let nn = nbrs.len();
    let next = ghost.first_upper_neighbor();
    let mut stats = PassStats::default();
    let requests = agree(comm, OP, bucket_requests(graph, st))?;

    let mut recvs: Vec<Option<C::RecvHandle>> = (0..nn).map(|_| None).collect();
    for k in 0..nn {
        let i = (next + nn - 1 - k) % nn;
        recvs[i] = Some(comm.irecv(nbrs[i], CommTag::MATCH_REQUEST).at(OP, 3)?);
    }
    let mut sends = Vec::with_capacity(nn);
    for k in 0..nn {
        let i = (next + k) % nn;
        sends.push(comm.isend(nbrs[i], CommTag::MATCH_REQUEST, encode_records(&requests[i])).at(OP, 4)?);
    }

    // None: empty request, no reply owed.
    let mut answers: Vec<Option<Vec<(Gnum, Answer)>>> = (0..nn).map(|_| None).collect();
    let handled = drain(&mut recvs, ctx.deterministic, 5, |i, bytes| {
        let incoming: Vec<WireMatePair> = decode_records(&bytes).decoded(OP)?;
        if incoming.is_empty() {
            return Ok(());
        }
        let mut out = Vec::with_capacity(incoming.len());
        for r in incoming {
            let requester = r.vert().decoded(OP)?;
            let target = r.mate().decoded(OP)?;
            let t = graph.local_of(target).ok_or_else(|| DgraphError::internal(OP, 6))?;
            match st.mates[t] {
                Mate::Free => {
                    let e = graph
                        .edge_range(t)
                        .find(|&e| graph.edges[e] == requester)
                        .ok_or_else(|| DgraphError::internal(OP, 7))?;
                    st.mates[graph.edge_gst(e)] = Mate::Matched(target);
                    st.mates[t] = Mate::Matched(requester);
                    stats.matched += 1;
                    out.push((requester, Answer::Now(target)));
                }
                Mate::Pending(e) if graph.edges[e] == requester => {
                    st.mates[graph.edge_gst(e)] = Mate::Matched(target);
                    st.mates[t] = Mate::Matched(requester);
                    if creator_of(target, requester) == target {
                        st.multinodes.push(Multinode::new(target, requester));
                    }
                    stats.matched += 1;
                }
                Mate::Pending(_) => out.push((requester, Answer::Deferred(t))),
                Mate::Matched(m) => out.push((requester, Answer::Now(refusal(target, m)))),
            }
        }
        answers[i] = Some(out);
        Ok(())
    });
    let sent = wait_all(sends).at(OP, 8).map(|_| ());
    agree(comm, OP, handled.and(sent))?;

    // Reply round.
    let mut recvs: Vec<Option<C::RecvHandle>> = (0..nn).map(|_| None).collect();
    for k in 0..nn {
        let i = (next + nn - 1 - k) % nn;
        if !requests[i].is_empty() {
            recvs[i] = Some(comm.irecv(nbrs[i], CommTag::MATCH_REPLY).at(OP, 9)?);
        }
    }
    let mut sends = Vec::with_capacity(nn);
    for k in 0..nn {
        let i = (next + k) % nn;
        let Some(out) = answers[i].take() else {
            continue;
        };
        let replies: Vec<WireMatePair> = out
            .into_iter()
            .filter_map(|(requester, a)| match a {
                Answer::Now(m) => Some(WireMatePair::new(requester, m)),
                Answer::Deferred(t) => match st.mates[t] {
                    Mate::Matched(m) => Some(WireMatePair::new(requester, refusal(graph.global_of(t), m))),
                    _ => None,
                },
            })
            .collect();
        sends.push(comm.isend(nbrs[i], CommTag::MATCH_REPLY, encode_records(&replies)).at(OP, 10)?);
    }

    let settled = drain(&mut recvs, ctx.deterministic, 11, |_, bytes| {
        let replies: Vec<WireMatePair> = decode_records(&bytes).decoded(OP)?;
        for r in replies {
            let vert = r.vert().decoded(OP)?;
            let mate = r.mate().decoded(OP)?;
            let v = graph.local_of(vert).ok_or_else(|| DgraphError::internal(OP, 12))?;
            let Mate::Pending(e) = st.mates[v] else {
                return Err(DgraphError::internal(OP, 13));
            };
            let target = graph.edges[e];
            let gst = graph.edge_gst(e);
            if mate == target {
                st.mates[v] = Mate::Matched(target);
                st.mates[gst] = Mate::Matched(vert);
                st.multinodes.push(Multinode::new(vert, target));
                stats.matched += 1;
            } else {
                st.mates[v] = Mate::Free;
                st.mates[gst] = Mate::Matched(if mate < 0 { target } else { mate });
                stats.refused += 1;
            }
        }
        Ok(())
    });
    let sent = wait_all(sends).at(OP, 14).map(|_| ());
    agree(comm, OP, settled.and(sent))?;

    trace!(
        "{OP}: rank {}: {} settled, {} refused",
        graph.rank(),
        stats.matched,
        stats.refused
    );
    Ok(stats)
}
