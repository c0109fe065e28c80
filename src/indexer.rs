//! Indexer (spec §4.3): walks POSIX paths, checks access, and emits file
//! batches sized by count and bytes. Grounded in
//! `nlds_processors/index.py`'s `IndexerConsumer.index`/`split`.
//!
//! Per spec §9 Open Question (b), the original's directory walk checks
//! `os.access(f, os.R_OK)` against the bare filename `f` rather than the
//! joined `directory/f` path — an apparent rebinding bug. This
//! implementation performs the evidently-intended behavior: every
//! permission and size check is run against the resolved, joined
//! absolute path.
//!
//! Permission checks run as the **requesting user**, resolved fresh per
//! message via [`resolve_requester`], never as the service process's own
//! identity: the consumer binary calls
//! `resolve_requester(&details.user, &details.group)` once per inbound
//! message and builds a new [`IndexerContext`] from the result before
//! calling [`index`].

use crate::error::NldsError;
use crate::protocol::{PathDetails, PathType};
use chrono::Utc;
use std::ffi::CString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Parameters for one `index()` call. `uid`/`gids` are the *requesting
/// user's* resolved identity (spec §4.3), freshly looked up per message
/// by [`resolve_requester`] — never the indexer service process's own
/// identity. `max_retries`/`filelist_max_length`/`message_threshold` are
/// the static config values, constant across messages.
#[derive(Debug, Clone)]
pub struct IndexerContext {
    pub uid: u32,
    pub gids: Vec<u32>,
    pub max_retries: u32,
    pub filelist_max_length: usize,
    pub message_threshold: u64,
}

/// Three disjoint output lists produced by one `index()` call (invariant
/// I1 in spec §4.3, testable property 1 in spec §8). `complete` is
/// pre-chunked into the batches that should actually be flushed to the
/// bus (sizing guarantee (a)/(b)).
#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub complete: Vec<Vec<PathDetails>>,
    pub problem: Vec<PathDetails>,
    pub failed: Vec<PathDetails>,
}

/// Split an oversized filelist into `filelist_max_length`-sized chunks,
/// re-enqueued to the indexer's own queue before indexing proceeds (spec
/// §4.3 "On entry, an oversized filelist is first split...").
pub fn split_oversized(filelist: Vec<PathDetails>, filelist_max_length: usize) -> Vec<Vec<PathDetails>> {
    if filelist.len() <= filelist_max_length {
        return vec![filelist];
    }
    filelist
        .chunks(filelist_max_length)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Resolve the requesting user's uid and full group-membership gid list
/// from the passwd/group databases, mirroring the original's
/// `IndexerConsumer.change_user` (`nlds_processors/index.py:196-218`),
/// which looks up `pwd.getpwnam(username)` before checking access as that
/// user. Unlike the original, this never calls `setuid`/`setgid` — spec
/// §4.3 requires "no process credential change" — the resolved identity
/// is only ever compared against file stat info in
/// [`effective_readable`].
///
/// `workspace_group` is the group-workspace name carried on
/// `details.group`; its gid (via `getgrnam`) is unioned into the result
/// alongside the user's full passwd/group-database membership, so a
/// requester whose NSS-reported supplementary groups don't happen to
/// include the workspace's own POSIX group is still checked against it.
/// A workspace group that doesn't resolve to a POSIX group is not an
/// error on its own — the user's own membership list may still cover it.
pub fn resolve_requester(username: &str, workspace_group: &str) -> Result<(u32, Vec<u32>), NldsError> {
    let cname = CString::new(username).map_err(|_| NldsError::UnknownRequester {
        user: username.to_string(),
    })?;

    let mut pwd_entry: libc::passwd = unsafe { std::mem::zeroed() };
    let mut pwd_buf = vec![0i8; 16384];
    let mut pwd_result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwnam_r(
            cname.as_ptr(),
            &mut pwd_entry,
            pwd_buf.as_mut_ptr(),
            pwd_buf.len(),
            &mut pwd_result,
        )
    };
    if rc != 0 || pwd_result.is_null() {
        return Err(NldsError::UnknownRequester {
            user: username.to_string(),
        });
    }

    let uid = pwd_entry.pw_uid;
    let primary_gid = pwd_entry.pw_gid;

    // `getgrouplist` needs a buffer sized for the user's full group
    // membership; it reports the required size back through `ngroups`
    // when the first attempt is too small.
    let mut ngroups: libc::c_int = 32;
    let mut gids: Vec<libc::gid_t> = vec![0; ngroups as usize];
    let rc = unsafe {
        libc::getgrouplist(cname.as_ptr(), primary_gid, gids.as_mut_ptr(), &mut ngroups)
    };
    if rc < 0 {
        gids = vec![0; ngroups.max(1) as usize];
        let rc = unsafe {
            libc::getgrouplist(cname.as_ptr(), primary_gid, gids.as_mut_ptr(), &mut ngroups)
        };
        if rc < 0 {
            gids = vec![primary_gid];
        } else {
            gids.truncate(ngroups.max(0) as usize);
        }
    } else {
        gids.truncate(ngroups.max(0) as usize);
    }
    if gids.is_empty() {
        gids.push(primary_gid);
    }

    if let Some(workspace_gid) = lookup_group_gid(workspace_group) {
        if !gids.contains(&workspace_gid) {
            gids.push(workspace_gid);
        }
    }

    Ok((uid, gids))
}

/// Best-effort `getgrnam` lookup: `None` if the named group doesn't exist
/// in the group database, which is not itself fatal to identity
/// resolution (spec: the requester's own passwd-derived gids may still
/// cover it).
fn lookup_group_gid(group_name: &str) -> Option<u32> {
    let cname = CString::new(group_name).ok()?;
    let mut grp_entry: libc::group = unsafe { std::mem::zeroed() };
    let mut buf = vec![0i8; 16384];
    let mut result: *mut libc::group = std::ptr::null_mut();

    let rc = unsafe {
        libc::getgrnam_r(
            cname.as_ptr(),
            &mut grp_entry,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    Some(grp_entry.gr_gid)
}

/// Whether `requesting_uid`/`requesting_gids` would be granted read
/// access to a file with file's owning uid/gid and POSIX mode bits, per
/// the standard owner/group/other rwx resolution. No process credential
/// change is performed (spec §4.3: "no process credential change").
fn effective_readable(meta: &fs::Metadata, requesting_uid: u32, requesting_gids: &[u32]) -> bool {
    const S_IRUSR: u32 = 0o400;
    const S_IRGRP: u32 = 0o040;
    const S_IROTH: u32 = 0o004;

    let mode = meta.mode();
    if requesting_uid == meta.uid() {
        return mode & S_IRUSR != 0;
    }
    if requesting_gids.contains(&meta.gid()) {
        return mode & S_IRGRP != 0;
    }
    mode & S_IROTH != 0
}

fn classify(meta: &fs::Metadata) -> PathType {
    if meta.is_dir() {
        PathType::Directory
    } else if meta.file_type().is_symlink() {
        PathType::Link
    } else if meta.is_file() {
        PathType::File
    } else {
        PathType::NotRecognised
    }
}

fn path_details_from(path: &Path, meta: &fs::Metadata, retry_count: u32) -> PathDetails {
    let path_type = classify(meta);
    let link_path = if path_type == PathType::Link {
        fs::read_link(path).ok().map(|p| p.display().to_string())
    } else {
        None
    };
    PathDetails {
        original_path: path.display().to_string(),
        path_type,
        link_path,
        size: meta.len(),
        mode: meta.mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        access_time: Utc::now(),
        object_name: None,
        retry_count,
        failure_reason: None,
    }
}

/// Index one filelist, producing the complete/problem/failed partition
/// described in spec §4.3. Directories are recursively walked; every
/// produced regular file is checked for read access before being added to
/// the complete list.
pub fn index(filelist: Vec<PathDetails>, ctx: &IndexerContext) -> IndexOutcome {
    let mut outcome = IndexOutcome::default();
    let mut batch: Vec<PathDetails> = Vec::new();
    let mut batch_size: u64 = 0;

    let mut flush = |batch: &mut Vec<PathDetails>, batch_size: &mut u64, outcome: &mut IndexOutcome| {
        if !batch.is_empty() {
            outcome.complete.push(std::mem::take(batch));
            *batch_size = 0;
        }
    };

    for item in filelist {
        if item.retry_count > ctx.max_retries {
            outcome.failed.push(item);
            continue;
        }

        let original = PathBuf::from(&item.original_path);
        let resolved = if original.is_absolute() {
            original.canonicalize().unwrap_or(original.clone())
        } else {
            original.clone()
        };

        let meta = match fs::symlink_metadata(&resolved) {
            Ok(m) => m,
            Err(_) => {
                let mut retried = item;
                retried.bump_retry("not_found");
                outcome.problem.push(retried);
                continue;
            }
        };

        if meta.is_dir() {
            walk_directory(&resolved, &item, ctx, &mut batch, &mut batch_size, &mut outcome);
            flush(&mut batch, &mut batch_size, &mut outcome);
            continue;
        }

        if !effective_readable(&meta, ctx.uid, &ctx.gids) {
            let mut retried = item;
            retried.bump_retry("permission_denied");
            outcome.problem.push(retried);
            continue;
        }

        let details = path_details_from(&resolved, &meta, item.retry_count);
        push_and_maybe_flush(details, ctx, &mut batch, &mut batch_size, &mut outcome);
    }

    flush(&mut batch, &mut batch_size, &mut outcome);
    outcome
}

fn push_and_maybe_flush(
    details: PathDetails,
    ctx: &IndexerContext,
    batch: &mut Vec<PathDetails>,
    batch_size: &mut u64,
    outcome: &mut IndexOutcome,
) {
    *batch_size += details.size;
    batch.push(details);
    if *batch_size >= ctx.message_threshold || batch.len() >= ctx.filelist_max_length {
        outcome.complete.push(std::mem::take(batch));
        *batch_size = 0;
    }
}

fn walk_directory(
    dir: &Path,
    origin: &PathDetails,
    ctx: &IndexerContext,
    batch: &mut Vec<PathDetails>,
    batch_size: &mut u64,
    outcome: &mut IndexOutcome,
) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => {
            let mut retried = origin.clone();
            retried.bump_retry("read_error");
            outcome.problem.push(retried);
            return;
        }
    };

    for entry in entries.flatten() {
        let joined = entry.path();
        let meta = match fs::symlink_metadata(&joined) {
            Ok(m) => m,
            Err(_) => continue,
        };

        if meta.is_dir() {
            walk_directory(&joined, origin, ctx, batch, batch_size, outcome);
            continue;
        }

        if !effective_readable(&meta, ctx.uid, &ctx.gids) {
            let mut retried = origin.clone();
            retried.bump_retry("permission_denied");
            outcome.problem.push(retried);
            continue;
        }

        let details = path_details_from(&joined, &meta, origin.retry_count);
        push_and_maybe_flush(details, ctx, batch, batch_size, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn ctx() -> IndexerContext {
        IndexerContext {
            uid: unsafe { libc::getuid() },
            gids: vec![unsafe { libc::getgid() }],
            max_retries: 5,
            filelist_max_length: 1000,
            message_threshold: 1024 * 1024 * 1024,
        }
    }

    fn path_detail(path: &str) -> PathDetails {
        PathDetails::new(path, PathType::File, 0)
    }

    #[test]
    fn s1_small_batch_indexes_in_one_emission() {
        let dir = tempdir().unwrap();
        let sizes = [100usize, 200, 300, 400];
        let mut filelist = Vec::new();
        for (i, size) in sizes.iter().enumerate() {
            let path = dir.path().join(format!("f{i}"));
            let mut f = File::create(&path).unwrap();
            f.write_all(&vec![0u8; *size]).unwrap();
            filelist.push(path_detail(path.to_str().unwrap()));
        }

        let outcome = index(filelist, &ctx());
        assert_eq!(outcome.problem.len(), 0);
        assert_eq!(outcome.failed.len(), 0);
        assert_eq!(outcome.complete.len(), 1);
        assert_eq!(outcome.complete[0].len(), 4);
    }

    #[test]
    fn s3_permission_denied_file_goes_to_problem_list() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noaccess");
        File::create(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

        let filelist = vec![path_detail(path.to_str().unwrap())];
        let outcome = index(filelist, &ctx());

        // Root (uid 0) bypasses POSIX permission bits entirely, so this
        // assertion only holds for a non-root test runner; skip cleanly
        // otherwise rather than asserting a false failure.
        if ctx().uid != 0 {
            assert_eq!(outcome.problem.len(), 1);
            assert_eq!(outcome.problem[0].retry_count, 1);
        }
    }

    #[test]
    fn nonexistent_path_goes_to_problem_list_with_incremented_retry() {
        let filelist = vec![path_detail("/nonexistent/path/does/not/exist")];
        let outcome = index(filelist, &ctx());
        assert_eq!(outcome.problem.len(), 1);
        assert_eq!(outcome.problem[0].retry_count, 1);
        assert_eq!(outcome.complete.len(), 0);
    }

    #[test]
    fn retries_exceeding_max_go_to_failed_list() {
        let mut item = path_detail("/nonexistent");
        item.retry_count = 999;
        let outcome = index(vec![item], &ctx());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.problem.len(), 0);
    }

    #[test]
    fn empty_input_emits_nothing() {
        let outcome = index(Vec::new(), &ctx());
        assert_eq!(outcome.complete.len(), 0);
        assert_eq!(outcome.problem.len(), 0);
        assert_eq!(outcome.failed.len(), 0);
    }

    #[test]
    fn directory_is_recursively_walked() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        File::create(dir.path().join("top.nc")).unwrap();
        File::create(sub.join("nested.nc")).unwrap();

        let filelist = vec![path_detail(dir.path().to_str().unwrap())];
        let outcome = index(filelist, &ctx());
        let total: usize = outcome.complete.iter().map(|b| b.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn oversized_filelist_splits_into_max_length_chunks() {
        let filelist: Vec<PathDetails> = (0..2500).map(|i| path_detail(&format!("/f{i}"))).collect();
        let chunks = split_oversized(filelist, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
    }

    /// Look up the current process's own username via the same passwd
    /// database `resolve_requester` reads, so the round-trip test below
    /// doesn't depend on a hardcoded account existing on the test runner.
    fn current_username() -> Option<String> {
        let uid = unsafe { libc::getuid() };
        let mut pwd_entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut buf = vec![0i8; 16384];
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe { libc::getpwuid_r(uid, &mut pwd_entry, buf.as_mut_ptr(), buf.len(), &mut result) };
        if rc != 0 || result.is_null() {
            return None;
        }
        let cname = unsafe { std::ffi::CStr::from_ptr(pwd_entry.pw_name) };
        cname.to_str().ok().map(|s| s.to_string())
    }

    #[test]
    fn resolve_requester_round_trips_current_user() {
        let Some(username) = current_username() else {
            return;
        };
        let (uid, gids) = resolve_requester(&username, "no-such-workspace-group-xyz")
            .expect("passwd lookup for own user");
        assert_eq!(uid, unsafe { libc::getuid() });
        assert!(!gids.is_empty());
    }

    #[test]
    fn resolve_requester_rejects_unknown_user() {
        let result = resolve_requester("no-such-user-nlds-test-xyz", "gws_test");
        assert!(matches!(result, Err(NldsError::UnknownRequester { .. })));
    }
}
