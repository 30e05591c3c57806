//! Read-only FUSE bridge over a parsed package.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, Request,
};
use tracing::warn;
use vpk::types::{Node, Nodes};
use vpk::Package;

const TTL: Duration = Duration::from_secs(1);
const BLOCK_SIZE: u64 = 512;

/// Payload of one inode. File preload bytes are moved out of the parsed
/// package, so serving them never touches the directory file again.
enum InodeKind {
    Dir {
        /// Child name to inode, in listing order
        children: Vec<(String, u64)>,
    },
    File {
        archive_index: u16,
        offset: u32,
        size: u32,
        preload: Vec<u8>,
    },
}

struct Inode {
    parent: u64,
    kind: InodeKind,
}

/// The mounted filesystem: a flattened inode table plus the open data
/// archives.
///
/// The kernel issues `read` requests concurrently, so the archive handle
/// map is behind a mutex and all bulk reads are positioned
/// ([`FileExt::read_at`]) instead of seek-then-read. Everything else is
/// read-only after construction.
pub struct VpkFs {
    name: String,
    srcdir: PathBuf,
    inodes: Vec<Inode>,
    archives: Mutex<HashMap<u16, Arc<File>>>,
    files: u64,
    total_size: u64,
    uid: u32,
    gid: u32,
}

impl VpkFs {
    pub fn new(package: Package) -> Self {
        let mut fs = VpkFs {
            name: package.name().to_string(),
            srcdir: package.srcdir().to_path_buf(),
            inodes: Vec::new(),
            archives: Mutex::new(HashMap::new()),
            files: 0,
            total_size: 0,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        };

        fs.inodes.push(Inode {
            parent: fuser::FUSE_ROOT_ID,
            kind: InodeKind::Dir {
                children: Vec::new(),
            },
        });
        let children = fs.add_nodes(fuser::FUSE_ROOT_ID, package.into_nodes());
        if let InodeKind::Dir {
            children: root_children,
        } = &mut fs.inodes[0].kind
        {
            *root_children = children;
        }
        fs
    }

    fn add_nodes(&mut self, parent: u64, nodes: Nodes) -> Vec<(String, u64)> {
        let mut children = Vec::with_capacity(nodes.len());
        for (name, node) in nodes {
            let ino = match node {
                Node::Dir(dir) => {
                    let slot = self.inodes.len();
                    self.inodes.push(Inode {
                        parent,
                        kind: InodeKind::Dir {
                            children: Vec::new(),
                        },
                    });
                    let ino = (slot + 1) as u64;
                    let grandchildren = self.add_nodes(ino, dir.into_nodes());
                    if let InodeKind::Dir { children } = &mut self.inodes[slot].kind {
                        *children = grandchildren;
                    }
                    ino
                }
                Node::File(file) => {
                    self.files += 1;
                    self.total_size += file.logical_size();
                    self.inodes.push(Inode {
                        parent,
                        kind: InodeKind::File {
                            archive_index: file.archive_index,
                            offset: file.offset,
                            size: file.size,
                            preload: file.preload,
                        },
                    });
                    self.inodes.len() as u64
                }
            };
            children.push((name, ino));
        }
        children
    }

    fn inode(&self, ino: u64) -> Option<&Inode> {
        self.inodes.get(ino.checked_sub(1)? as usize)
    }

    fn attr(&self, ino: u64) -> Option<FileAttr> {
        let inode = self.inode(ino)?;
        let attr = match &inode.kind {
            InodeKind::Dir { children } => FileAttr {
                ino,
                size: 0,
                blocks: 0,
                atime: UNIX_EPOCH,
                mtime: UNIX_EPOCH,
                ctime: UNIX_EPOCH,
                crtime: UNIX_EPOCH,
                kind: FileType::Directory,
                perm: 0o555,
                nlink: children.len() as u32,
                uid: self.uid,
                gid: self.gid,
                rdev: 0,
                blksize: BLOCK_SIZE as u32,
                flags: 0,
            },
            InodeKind::File { size, preload, .. } => {
                let logical = preload.len() as u64 + u64::from(*size);
                FileAttr {
                    ino,
                    size: logical,
                    blocks: logical.div_ceil(BLOCK_SIZE),
                    atime: UNIX_EPOCH,
                    mtime: UNIX_EPOCH,
                    ctime: UNIX_EPOCH,
                    crtime: UNIX_EPOCH,
                    kind: FileType::RegularFile,
                    perm: 0o444,
                    nlink: 1,
                    uid: self.uid,
                    gid: self.gid,
                    rdev: 0,
                    blksize: BLOCK_SIZE as u32,
                    flags: 0,
                }
            }
        };
        Some(attr)
    }

    /// Open (or reuse) the numbered data archive. Callable from
    /// concurrent kernel read requests.
    fn archive(&self, index: u16) -> io::Result<Arc<File>> {
        let mut archives = match self.archives.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(archive) = archives.get(&index) {
            return Ok(archive.clone());
        }
        let path = self.srcdir.join(format!("{}_{:03}.vpk", self.name, index));
        let archive = Arc::new(File::open(&path)?);
        archives.insert(index, archive.clone());
        Ok(archive)
    }

    /// Serve `size` bytes at `offset` of a file inode: the first
    /// `preload.len()` logical bytes come from the preload buffer, the
    /// rest from the entry's slice of the numbered data archive.
    fn read_range(&self, ino: u64, offset: u64, size: u32) -> Result<Vec<u8>, i32> {
        let Some(Inode {
            kind:
                InodeKind::File {
                    archive_index,
                    offset: bulk_offset,
                    size: bulk_size,
                    preload,
                },
            ..
        }) = self.inode(ino)
        else {
            return Err(libc::ENOENT);
        };

        let logical = preload.len() as u64 + u64::from(*bulk_size);
        let start = offset.min(logical);
        let end = (offset + u64::from(size)).min(logical);
        let preload_len = preload.len() as u64;

        let mut data = Vec::with_capacity((end - start) as usize);
        if start < preload_len {
            let head_end = end.min(preload_len);
            data.extend_from_slice(&preload[start as usize..head_end as usize]);
        }
        if end > preload_len {
            let from = start.max(preload_len) - preload_len;
            let length = end - preload_len - from;
            let archive = self.archive(*archive_index).map_err(|error| {
                warn!(archive_index, %error, "opening data archive failed");
                error.raw_os_error().unwrap_or(libc::EIO)
            })?;

            let mut bulk = vec![0u8; length as usize];
            archive
                .read_exact_at(&mut bulk, u64::from(*bulk_offset) + from)
                .map_err(|error| {
                    warn!(archive_index, %error, "reading data archive failed");
                    error.raw_os_error().unwrap_or(libc::EIO)
                })?;
            data.extend_from_slice(&bulk);
        }
        Ok(data)
    }
}

impl Filesystem for VpkFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(Inode {
            kind: InodeKind::Dir { children },
            ..
        }) = self.inode(parent)
        else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        let child = children
            .iter()
            .find(|(child, _)| child.as_str() == name)
            .map(|(_, ino)| *ino);
        match child.and_then(|ino| self.attr(ino)) {
            Some(attr) => reply.entry(&TTL, &attr, 0),
            None => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.attr(ino) {
            Some(attr) => reply.attr(&TTL, &attr),
            None => reply.error(libc::ENOENT),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.inode(ino) {
            Some(Inode {
                kind: InodeKind::Dir { .. },
                ..
            }) => reply.opened(0, 0),
            Some(_) => reply.error(libc::ENOTDIR),
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(Inode {
            parent,
            kind: InodeKind::Dir { children },
        }) = self.inode(ino)
        else {
            reply.error(libc::ENOENT);
            return;
        };

        let mut entries: Vec<(u64, FileType, &str)> = vec![
            (ino, FileType::Directory, "."),
            (*parent, FileType::Directory, ".."),
        ];
        for (name, child) in children {
            let kind = match self.inode(*child).map(|inode| &inode.kind) {
                Some(InodeKind::Dir { .. }) => FileType::Directory,
                _ => FileType::RegularFile,
            };
            entries.push((*child, kind, name));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            // The offset handed back is the index of the next entry.
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.inode(ino) {
            Some(Inode {
                kind: InodeKind::File { .. },
                ..
            }) => {
                if flags & libc::O_ACCMODE != libc::O_RDONLY {
                    reply.error(libc::EACCES);
                } else {
                    reply.opened(0, 0);
                }
            }
            Some(_) => reply.error(libc::EISDIR),
            None => reply.error(libc::ENOENT),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.read_range(ino, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(
            self.total_size.div_ceil(BLOCK_SIZE),
            0,
            0,
            self.files,
            0,
            BLOCK_SIZE as u32,
            255,
            BLOCK_SIZE as u32,
        );
    }
}
