//! Symmetric point-to-point exchanges with a known set of peers.
//!
//! Every helper posts all receives first, then all sends, and drains every
//! handle before returning, even when one of them failed.

use crate::algs::communicator::{CommTag, Communicator, Wait, wait_all};
use crate::graph_error::{CommResultExt, DgraphError};

/// Send `payloads[i]` to `peers[i]` and receive one message from each peer.
/// Both sides must list each other. Results are indexed like `peers`.
pub(crate) fn exchange_with<C: Communicator>(
    comm: &C,
    op: &'static str,
    site: u32,
    tag: CommTag,
    peers: &[usize],
    payloads: &[Vec<u8>],
) -> Result<Vec<Vec<u8>>, DgraphError> {
    if payloads.len() != peers.len() {
        return Err(DgraphError::internal(op, site));
    }
    let mut recvs = Vec::with_capacity(peers.len());
    for &p in peers {
        recvs.push(comm.irecv(p, tag).at(op, site)?);
    }
    let mut sends = Vec::with_capacity(peers.len());
    let mut first_err = None;
    for (&p, buf) in peers.iter().zip(payloads) {
        match comm.isend(p, tag, buf) {
            Ok(h) => sends.push(h),
            Err(e) => {
                first_err.get_or_insert(DgraphError::comm(op, site, e));
            }
        }
    }
    let mut out = Vec::with_capacity(peers.len());
    for h in recvs {
        match h.wait() {
            Ok(data) => out.push(data),
            Err(e) => {
                out.push(Vec::new());
                first_err.get_or_insert(DgraphError::comm(op, site, e));
            }
        }
    }
    if let Err(e) = wait_all(sends) {
        first_err.get_or_insert(DgraphError::comm(op, site, e));
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Personalised all-to-all: `payloads[p]` goes to rank `p`; the result holds
/// what every rank sent to us (our own slot is moved through unchanged).
pub(crate) fn alltoallv<C: Communicator>(
    comm: &C,
    op: &'static str,
    site: u32,
    tag: CommTag,
    mut payloads: Vec<Vec<u8>>,
) -> Result<Vec<Vec<u8>>, DgraphError> {
    let me = comm.rank();
    let size = comm.size();
    if payloads.len() != size {
        return Err(DgraphError::internal(op, site));
    }
    let own = std::mem::take(&mut payloads[me]);
    let peers: Vec<usize> = (0..size).filter(|&p| p != me).collect();
    let bufs: Vec<Vec<u8>> = peers.iter().map(|&p| std::mem::take(&mut payloads[p])).collect();
    let got = exchange_with(comm, op, site, tag, &peers, &bufs)?;
    let mut out = vec![Vec::new(); size];
    out[me] = own;
    for (p, data) in peers.into_iter().zip(got) {
        out[p] = data;
    }
    Ok(out)
}

/// Receive whatever `senders` ship to us while shipping `outgoing` to its
/// destinations; both sides must agree on who talks to whom.
pub(crate) fn ship<C: Communicator>(
    comm: &C,
    op: &'static str,
    site: u32,
    tag: CommTag,
    outgoing: &[(usize, Vec<u8>)],
    senders: &[usize],
) -> Result<Vec<Vec<u8>>, DgraphError> {
    let mut recvs = Vec::with_capacity(senders.len());
    for &p in senders {
        recvs.push(comm.irecv(p, tag).at(op, site)?);
    }
    let mut sends = Vec::with_capacity(outgoing.len());
    for (p, buf) in outgoing {
        sends.push(comm.isend(*p, tag, buf).at(op, site)?);
    }
    let got = wait_all(recvs).at(op, site);
    let sent = wait_all(sends).at(op, site);
    let got = got?;
    sent?;
    Ok(got)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;

    #[test]
    fn alltoallv_routes_by_rank() {
        let out = ThreadComm::run(3, |comm| {
            let me = comm.rank() as u8;
            let payloads = (0..3u8).map(|p| vec![me, p]).collect();
            alltoallv(&comm, "test", 0, CommTag::new(99), payloads).unwrap()
        });
        for (me, got) in out.into_iter().enumerate() {
            for (p, data) in got.into_iter().enumerate() {
                assert_eq!(data, vec![p as u8, me as u8]);
            }
        }
    }
}
