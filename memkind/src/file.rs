//! 文件操作同样可以携带断言种类。

use crate::{
    negotiator::CommunicationContext, Communicator, MemoryKind, NegotiationError, OptionMap,
};
use std::{fs::File, path::Path};

/// 打开文件时使用的选项，断言读写缓冲区的种类。
#[inline]
pub fn file_options(kind: MemoryKind) -> OptionMap {
    OptionMap::asserting(kind)
}

impl<C: Communicator> CommunicationContext<C> {
    /// 通过通信器打开文件，断言与上下文相同的种类。
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<File, NegotiationError> {
        self.communicator()
            .file_open(path.as_ref(), &file_options(self.kind()))
    }
}

#[cfg(test)]
mod test {
    use super::file_options;
    use crate::{
        common_cpu::InprocWorld,
        negotiator::{CapabilityNegotiator, Config},
        CapabilitySet, Communicator, Domain, MemoryKind, NegotiationErrorKind, Restrictor,
        ASSERT_MEMORY_ALLOC_KINDS,
    };
    use std::{
        env::temp_dir,
        fs::remove_file,
        io::{Read, Seek, Write},
    };

    #[test]
    fn test_options() {
        let device = MemoryKind::new(Domain::Rocm, Restrictor::Device).unwrap();
        assert_eq!(
            file_options(device).get(ASSERT_MEMORY_ALLOC_KINDS),
            Some("rocm:device")
        );
    }

    #[test]
    fn test_open_asserted() {
        let rt = InprocWorld::new(1)
            .supporting(0, "cuda:device")
            .build()
            .pop()
            .unwrap();
        let negotiator = CapabilityNegotiator::new(rt, Config::default());
        let session = negotiator
            .request(&CapabilitySet::parse("system,cuda:device"))
            .unwrap();
        let group = negotiator.group(&session).unwrap();
        let device = MemoryKind::new(Domain::Cuda, Restrictor::Device).unwrap();
        let context = negotiator.assert_kind(&group, device, "file").unwrap();

        let path = temp_dir().join(format!("memkind-file-{}.bin", std::process::id()));
        let mut file = context.open_file(&path).unwrap();
        file.write_all(b"memkind").unwrap();
        file.rewind().unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "memkind");
        drop(file);

        let managed = MemoryKind::new(Domain::Cuda, Restrictor::Managed).unwrap();
        let e = context
            .communicator()
            .file_open(&path, &file_options(managed))
            .err()
            .unwrap();
        assert_eq!(e.kind, NegotiationErrorKind::AssertionRejected);

        let e = context
            .communicator()
            .file_open(&temp_dir().join("memkind-missing/file.bin"), &file_options(device))
            .err()
            .unwrap();
        assert_eq!(e.kind, NegotiationErrorKind::FileOperationFailure);

        remove_file(&path).unwrap();
        context.release().unwrap();
        negotiator.finalize(session).unwrap();
    }
}
