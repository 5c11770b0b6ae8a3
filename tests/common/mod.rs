/// Mock external collaborators (`DirectoryClient`, `DramClient`).
pub mod mocks;
