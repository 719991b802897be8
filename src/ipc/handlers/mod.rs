pub mod akademik;
pub mod backup;
pub mod core;
pub mod kehadiran;
pub mod kelas;
pub mod mapel;
pub mod nilai;
pub mod promosi;
pub mod rapot;
pub mod setup;
pub mod sikap;
pub mod siswa;
